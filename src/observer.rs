use crate::compute_graph::{GraphId, NodeId};

pub trait GraphObserver {
    fn on_node_ordered(&mut self, graph: GraphId, node: NodeId, topo_id: usize);
    fn on_node_moved(&mut self, node: NodeId, from: GraphId, to: GraphId);
    fn on_node_removed(&mut self, graph: GraphId, node: NodeId, name: &str);
}

impl GraphObserver for () {
    fn on_node_ordered(&mut self, _graph: GraphId, _node: NodeId, _topo_id: usize) {}
    fn on_node_moved(&mut self, _node: NodeId, _from: GraphId, _to: GraphId) {}
    fn on_node_removed(&mut self, _graph: GraphId, _node: NodeId, _name: &str) {}
}

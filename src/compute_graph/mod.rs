use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod builder;
pub mod edit;
pub mod node;
pub mod op_desc;

pub use node::{Anchor, InDataAnchor, Node, NodeId, OutDataAnchor};
pub use op_desc::{AttrStore, AttrValue, NodeRole, OpDesc, TensorDesc};

/// Nesting bound used by recursive walks that do not take an explicit config.
pub const DEFAULT_MAX_SUBGRAPH_DEPTH: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Unknown or removed node {0:?}")]
    UnknownNode(NodeId),
    #[error("Unknown or removed graph {0:?}")]
    UnknownGraph(GraphId),
    #[error("Node {node} is not owned by graph {graph}")]
    ForeignNode { node: String, graph: String },
    #[error("Anchor {0:?} does not exist")]
    InvalidAnchor(Anchor),
    #[error("Unsupported edge kind {0:?} -> {1:?}")]
    UnsupportedEdge(Anchor, Anchor),
    #[error("Edge {0:?} -> {1:?} does not exist")]
    MissingEdge(Anchor, Anchor),
    #[error("Edge {0:?} -> {1:?} already exists or the input is occupied")]
    DuplicateEdge(Anchor, Anchor),
    #[error("Cannot link nodes owned by different graphs: {0} and {1}")]
    CrossGraphEdge(String, String),
    #[error("Subgraph {0} is already registered")]
    DuplicateSubgraph(String),
    #[error("Subgraph {0} is not registered")]
    UnknownSubgraph(String),
    #[error("Io map has {got} entries but node {node} has {expected} outputs")]
    IoMapMismatch {
        node: String,
        got: usize,
        expected: usize,
    },
    #[error("Io map of node {node} forwards missing input {input}")]
    IoMapInvalidInput { node: String, input: usize },
    #[error("Subgraph nesting exceeds depth {0}")]
    DepthExceeded(usize),
    #[error("Cannot swap graph {0:?} with itself")]
    SelfSwap(GraphId),
}

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct GraphId {
    inner: usize,
}

#[derive(Debug, Clone)]
pub struct ComputeGraph {
    id: GraphId,
    name: String,
    pub(crate) nodes: Vec<NodeId>,
    // Only populated on root graphs.
    pub(crate) subgraphs: Vec<(String, GraphId)>,
    pub(crate) parent_graph: Option<GraphId>,
    pub(crate) parent_node: Option<NodeId>,
    pub attrs: AttrStore,
    unknown_shape: bool,
    valid: bool,
}

impl ComputeGraph {
    fn new(id: GraphId, name: String) -> Self {
        Self {
            id,
            name,
            nodes: Vec::new(),
            subgraphs: Vec::new(),
            parent_graph: None,
            parent_node: None,
            attrs: AttrStore::new(),
            unknown_shape: false,
            valid: false,
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direct_nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn parent_graph(&self) -> Option<GraphId> {
        self.parent_graph
    }

    pub fn parent_node(&self) -> Option<NodeId> {
        self.parent_node
    }

    pub fn is_root(&self) -> bool {
        self.parent_graph.is_none()
    }

    pub fn graph_unknown_flag(&self) -> bool {
        self.unknown_shape
    }

    pub fn set_graph_unknown_flag(&mut self, unknown: bool) {
        self.unknown_shape = unknown;
    }

    /// True while node order and ids reflect the last successful sort.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub(crate) fn mark_valid(&mut self) {
        self.valid = true;
    }
}

/// Owns every graph and node. Handles are never reused, so a handle that
/// outlives its target simply stops resolving.
#[derive(Debug, Clone, Default)]
pub struct GraphArena {
    graphs: HashMap<GraphId, ComputeGraph>,
    nodes: HashMap<NodeId, Node>,
    next_graph_id: usize,
    next_node_id: usize,
}

impl GraphArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_graph(&mut self, name: impl Into<String>) -> GraphId {
        let id = GraphId {
            inner: self.next_graph_id,
        };
        self.next_graph_id += 1;
        self.graphs.insert(id, ComputeGraph::new(id, name.into()));
        id
    }

    pub fn get_graph(&self, id: GraphId) -> Option<&ComputeGraph> {
        self.graphs.get(&id)
    }

    pub fn get_graph_mut(&mut self, id: GraphId) -> Option<&mut ComputeGraph> {
        self.graphs.get_mut(&id)
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn graph_ref(&self, id: GraphId) -> Result<&ComputeGraph, GraphError> {
        self.graphs.get(&id).ok_or(GraphError::UnknownGraph(id))
    }

    pub(crate) fn graph_mut(&mut self, id: GraphId) -> Result<&mut ComputeGraph, GraphError> {
        self.graphs.get_mut(&id).ok_or(GraphError::UnknownGraph(id))
    }

    pub(crate) fn node_ref(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))
    }

    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).map(|x| x.name())
    }

    pub fn graph_name(&self, id: GraphId) -> Option<&str> {
        self.graphs.get(&id).map(|x| x.name())
    }

    pub fn node_attrs_mut(&mut self, id: NodeId) -> Option<&mut AttrStore> {
        self.nodes.get_mut(&id).map(|x| &mut x.op.attrs)
    }

    pub fn input_desc_mut(&mut self, id: NodeId, index: usize) -> Option<&mut TensorDesc> {
        self.nodes
            .get_mut(&id)
            .and_then(|x| x.op.input_desc_mut(index))
    }

    pub fn output_desc_mut(&mut self, id: NodeId, index: usize) -> Option<&mut TensorDesc> {
        self.nodes
            .get_mut(&id)
            .and_then(|x| x.op.output_desc_mut(index))
    }

    /// Overrides the sequential id of a node, e.g. before `reorder_by_node_id`.
    pub fn set_node_topo_id(&mut self, id: NodeId, topo_id: Option<usize>) -> Result<(), GraphError> {
        self.node_mut(id)?.topo_id = topo_id;
        Ok(())
    }

    pub(crate) fn invalidate(&mut self, graph: GraphId) {
        if let Some(g) = self.graphs.get_mut(&graph) {
            g.invalidate();
        }
    }

    fn foreign_node_error(&self, node: NodeId, graph: GraphId) -> GraphError {
        GraphError::ForeignNode {
            node: self
                .node_name(node)
                .map(|x| x.to_string())
                .unwrap_or_else(|| format!("{node:?}")),
            graph: self
                .graph_name(graph)
                .map(|x| x.to_string())
                .unwrap_or_else(|| format!("{graph:?}")),
        }
    }

    pub(crate) fn ensure_owned(&self, graph: GraphId, node: NodeId) -> Result<(), GraphError> {
        self.graph_ref(graph)?;
        if self.node_ref(node)?.owner != graph {
            return Err(self.foreign_node_error(node, graph));
        }
        Ok(())
    }

    /// Allocates a node in `graph` without checking the handle. Callers guarantee it resolves.
    pub(crate) fn insert_node(&mut self, graph: GraphId, op: OpDesc, front: bool) -> NodeId {
        let id = NodeId::new(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.insert(id, Node::new(id, op, graph));
        if let Some(g) = self.graphs.get_mut(&graph) {
            if front {
                g.nodes.insert(0, id);
            } else {
                g.nodes.push(id);
            }
            g.invalidate();
        }
        id
    }

    pub fn add_node(&mut self, graph: GraphId, op: OpDesc) -> Result<NodeId, GraphError> {
        self.graph_ref(graph)?;
        Ok(self.insert_node(graph, op, false))
    }

    pub fn add_node_front(&mut self, graph: GraphId, op: OpDesc) -> Result<NodeId, GraphError> {
        self.graph_ref(graph)?;
        Ok(self.insert_node(graph, op, true))
    }

    /// Unlinks every edge of `node` and drops it. Fails without touching the
    /// graph when the node belongs to another graph.
    pub fn remove_node(&mut self, graph: GraphId, node: NodeId) -> Result<(), GraphError> {
        self.ensure_owned(graph, node)?;
        self.unlink_all(node)?;
        let g = self.graph_mut(graph)?;
        g.nodes.retain(|x| *x != node);
        g.invalidate();
        self.nodes.remove(&node);
        Ok(())
    }

    fn check_out_data(&self, anchor: OutDataAnchor) -> Result<&Node, GraphError> {
        let node = self.node_ref(anchor.node)?;
        if anchor.index >= node.out_data.len() {
            return Err(GraphError::InvalidAnchor(anchor.into()));
        }
        Ok(node)
    }

    fn check_in_data(&self, anchor: InDataAnchor) -> Result<&Node, GraphError> {
        let node = self.node_ref(anchor.node)?;
        if anchor.index >= node.in_data.len() {
            return Err(GraphError::InvalidAnchor(anchor.into()));
        }
        Ok(node)
    }

    fn check_same_owner(&self, a: NodeId, b: NodeId) -> Result<GraphId, GraphError> {
        let owner_a = self.node_ref(a)?.owner;
        let owner_b = self.node_ref(b)?.owner;
        if owner_a != owner_b {
            return Err(GraphError::CrossGraphEdge(
                self.node_name(a).unwrap_or_default().to_string(),
                self.node_name(b).unwrap_or_default().to_string(),
            ));
        }
        Ok(owner_a)
    }

    pub fn has_edge(&self, src: impl Into<Anchor>, dst: impl Into<Anchor>) -> bool {
        let (src, dst) = (src.into(), dst.into());
        match (src, dst) {
            (Anchor::OutData(s), Anchor::InData(d)) => self
                .nodes
                .get(&d.node)
                .and_then(|x| x.in_data.get(d.index).copied().flatten())
                == Some(s),
            (Anchor::OutData(s), Anchor::InControl(d)) => self
                .nodes
                .get(&s.node)
                .and_then(|x| x.out_data.get(s.index))
                .is_some_and(|x| x.control.contains(&d)),
            (Anchor::OutControl(s), Anchor::InControl(d)) => self
                .nodes
                .get(&s)
                .is_some_and(|x| x.out_control.contains(&d)),
            _ => false,
        }
    }

    pub fn add_edge(&mut self, src: impl Into<Anchor>, dst: impl Into<Anchor>) -> Result<(), GraphError> {
        let (src, dst) = (src.into(), dst.into());
        match (src, dst) {
            (Anchor::OutData(s), Anchor::InData(d)) => {
                self.check_out_data(s)?;
                let consumer = self.check_in_data(d)?;
                if consumer.in_data[d.index].is_some() {
                    return Err(GraphError::DuplicateEdge(src, dst));
                }
                let owner = self.check_same_owner(s.node, d.node)?;
                self.node_mut(s.node)?.out_data[s.index].data.push(d);
                self.node_mut(d.node)?.in_data[d.index] = Some(s);
                self.invalidate(owner);
            }
            (Anchor::OutData(s), Anchor::InControl(d)) => {
                self.check_out_data(s)?;
                self.node_ref(d)?;
                if self.has_edge(src, dst) {
                    return Err(GraphError::DuplicateEdge(src, dst));
                }
                let owner = self.check_same_owner(s.node, d)?;
                self.node_mut(s.node)?.out_data[s.index].control.push(d);
                self.node_mut(d)?.in_control.push(src);
                self.invalidate(owner);
            }
            (Anchor::OutControl(s), Anchor::InControl(d)) => {
                self.node_ref(s)?;
                self.node_ref(d)?;
                if self.has_edge(src, dst) {
                    return Err(GraphError::DuplicateEdge(src, dst));
                }
                let owner = self.check_same_owner(s, d)?;
                self.node_mut(s)?.out_control.push(d);
                self.node_mut(d)?.in_control.push(src);
                self.invalidate(owner);
            }
            _ => return Err(GraphError::UnsupportedEdge(src, dst)),
        }
        Ok(())
    }

    pub fn remove_edge(&mut self, src: impl Into<Anchor>, dst: impl Into<Anchor>) -> Result<(), GraphError> {
        let (src, dst) = (src.into(), dst.into());
        if !matches!(
            (src, dst),
            (Anchor::OutData(_), Anchor::InData(_))
                | (Anchor::OutData(_), Anchor::InControl(_))
                | (Anchor::OutControl(_), Anchor::InControl(_))
        ) {
            return Err(GraphError::UnsupportedEdge(src, dst));
        }
        if !self.has_edge(src, dst) {
            return Err(GraphError::MissingEdge(src, dst));
        }
        let owner = self.node_ref(src.node())?.owner;
        match (src, dst) {
            (Anchor::OutData(s), Anchor::InData(d)) => {
                self.node_mut(s.node)?.out_data[s.index].data.retain(|x| *x != d);
                self.node_mut(d.node)?.in_data[d.index] = None;
            }
            (Anchor::OutData(s), Anchor::InControl(d)) => {
                self.node_mut(s.node)?.out_data[s.index].control.retain(|x| *x != d);
                self.node_mut(d)?.in_control.retain(|x| *x != src);
            }
            (Anchor::OutControl(s), Anchor::InControl(d)) => {
                self.node_mut(s)?.out_control.retain(|x| *x != d);
                self.node_mut(d)?.in_control.retain(|x| *x != src);
            }
            _ => {}
        }
        self.invalidate(owner);
        Ok(())
    }

    /// Adds a control edge unless it would be a self-loop or already exists.
    pub(crate) fn ensure_control_edge(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError> {
        if src == dst || self.has_edge(src.control_out(), dst.control_in()) {
            return Ok(());
        }
        self.add_edge(src.control_out(), dst.control_in())
    }

    /// Every edge touching `node`, as (src, dst) pairs.
    pub(crate) fn edges_of(&self, node: NodeId) -> Result<Vec<(Anchor, Anchor)>, GraphError> {
        let n = self.node_ref(node)?;
        let mut edges = Vec::new();
        for (i, peer) in n.in_data.iter().enumerate() {
            if let Some(peer) = peer {
                edges.push(((*peer).into(), node.input(i).into()));
            }
        }
        for src in &n.in_control {
            edges.push((*src, node.control_in()));
        }
        for (i, links) in n.out_data.iter().enumerate() {
            for peer in &links.data {
                edges.push((node.output(i).into(), (*peer).into()));
            }
            for peer in &links.control {
                edges.push((node.output(i).into(), peer.control_in()));
            }
        }
        for peer in &n.out_control {
            edges.push((node.control_out(), peer.control_in()));
        }
        Ok(edges)
    }

    pub(crate) fn unlink_all(&mut self, node: NodeId) -> Result<(), GraphError> {
        for (src, dst) in self.edges_of(node)? {
            // a self-loop shows up on both sides
            if self.has_edge(src, dst) {
                self.remove_edge(src, dst)?;
            }
        }
        Ok(())
    }

    pub fn get_direct_node(&self, graph: GraphId) -> Result<&[NodeId], GraphError> {
        Ok(&self.graph_ref(graph)?.nodes)
    }

    pub fn get_direct_node_with_filter(
        &self,
        graph: GraphId,
        node_filter: &dyn Fn(&Node) -> bool,
    ) -> Result<Vec<NodeId>, GraphError> {
        let g = self.graph_ref(graph)?;
        Ok(g.nodes
            .iter()
            .filter(|x| self.nodes.get(x).is_some_and(node_filter))
            .copied()
            .collect())
    }

    pub fn get_all_nodes(&self, graph: GraphId) -> Result<Vec<NodeId>, GraphError> {
        self.get_all_nodes_with_filter(graph, &|_| true, &|_, _, _| true)
    }

    /// Nodes of `graph` in direct order, each followed by the nodes of the subgraphs
    /// it hosts. `node_filter` picks which nodes are returned; `graph_filter` is asked
    /// at every subgraph boundary whether to descend.
    pub fn get_all_nodes_with_filter(
        &self,
        graph: GraphId,
        node_filter: &dyn Fn(&Node) -> bool,
        graph_filter: &dyn Fn(&Node, &str, &ComputeGraph) -> bool,
    ) -> Result<Vec<NodeId>, GraphError> {
        let mut ret = Vec::new();
        self.walk_all_nodes(graph, DEFAULT_MAX_SUBGRAPH_DEPTH, graph_filter, |node, _| {
            if node_filter(node) {
                ret.push(node.id());
            }
            Ok::<(), GraphError>(())
        })?;
        Ok(ret)
    }

    /// Depth-first walk over a graph tree with an explicit stack. The visitor gets
    /// each node with its nesting depth.
    pub(crate) fn walk_all_nodes<E: From<GraphError>>(
        &self,
        graph: GraphId,
        max_depth: usize,
        graph_filter: &dyn Fn(&Node, &str, &ComputeGraph) -> bool,
        mut visitor: impl FnMut(&Node, usize) -> Result<(), E>,
    ) -> Result<(), E> {
        let root = self.root_graph(graph)?;
        let mut stack: Vec<(GraphId, usize, usize)> = vec![(graph, 0, 0)];
        while let Some((current, position, depth)) = stack.pop() {
            let g = self.graph_ref(current)?;
            let Some(node_id) = g.nodes.get(position) else {
                continue;
            };
            stack.push((current, position + 1, depth));
            let node = self.node_ref(*node_id)?;
            visitor(node, depth)?;
            // push in reverse so the first hosted subgraph is walked first
            for name in node.op.subgraph_instance_names().iter().rev() {
                let Some(sub) = self.find_registered_subgraph(root, name) else {
                    continue;
                };
                let sub_graph = self.graph_ref(sub)?;
                if !graph_filter(node, name, sub_graph) {
                    continue;
                }
                if depth + 1 > max_depth {
                    return Err(GraphError::DepthExceeded(max_depth).into());
                }
                stack.push((sub, 0, depth + 1));
            }
        }
        Ok(())
    }

    pub fn find_node(&self, graph: GraphId, name: &str) -> Option<NodeId> {
        let g = self.graphs.get(&graph)?;
        g.nodes
            .iter()
            .find(|x| self.node_name(**x) == Some(name))
            .copied()
    }

    pub fn find_first_node_match_type(&self, graph: GraphId, op_type: &str) -> Option<NodeId> {
        let g = self.graphs.get(&graph)?;
        g.nodes
            .iter()
            .find(|x| self.nodes.get(x).is_some_and(|n| n.op_type() == op_type))
            .copied()
    }

    /// Searches the whole tree below `graph`.
    pub fn find_node_from_all_nodes(&self, graph: GraphId, name: &str) -> Option<NodeId> {
        let all = self.get_all_nodes(graph).ok()?;
        all.into_iter().find(|x| self.node_name(*x) == Some(name))
    }

    pub fn root_graph(&self, graph: GraphId) -> Result<GraphId, GraphError> {
        let mut current = graph;
        // parent chains longer than the number of graphs can only be loops
        for _ in 0..=self.graphs.len() {
            match self.graph_ref(current)?.parent_graph {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
        Err(GraphError::DepthExceeded(self.graphs.len()))
    }

    fn find_registered_subgraph(&self, root: GraphId, name: &str) -> Option<GraphId> {
        self.graphs
            .get(&root)?
            .subgraphs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    /// Registers `subgraph` under the root of `graph`, keyed by its name.
    pub fn add_subgraph(&mut self, graph: GraphId, subgraph: GraphId) -> Result<(), GraphError> {
        let root = self.root_graph(graph)?;
        let name = self.graph_ref(subgraph)?.name.clone();
        if self.find_registered_subgraph(root, &name).is_some() {
            return Err(GraphError::DuplicateSubgraph(name));
        }
        self.graph_mut(root)?.subgraphs.push((name, subgraph));
        Ok(())
    }

    pub fn get_subgraph(&self, graph: GraphId, name: &str) -> Option<GraphId> {
        let root = self.root_graph(graph).ok()?;
        self.find_registered_subgraph(root, name)
    }

    pub fn get_all_subgraphs(&self, graph: GraphId) -> Result<Vec<GraphId>, GraphError> {
        let root = self.root_graph(graph)?;
        Ok(self.graph_ref(root)?.subgraphs.iter().map(|(_, id)| *id).collect())
    }

    pub fn set_parent(
        &mut self,
        subgraph: GraphId,
        parent_graph: GraphId,
        parent_node: NodeId,
    ) -> Result<(), GraphError> {
        self.ensure_owned(parent_graph, parent_node)?;
        let g = self.graph_mut(subgraph)?;
        g.parent_graph = Some(parent_graph);
        g.parent_node = Some(parent_node);
        Ok(())
    }

    /// Hangs `subgraph` under `host`: records the instance name on the host,
    /// wires the parent links and registers it with the root.
    pub fn attach_subgraph(&mut self, host: NodeId, subgraph: GraphId) -> Result<(), GraphError> {
        let owner = self.node_ref(host)?.owner;
        self.add_subgraph(owner, subgraph)?;
        self.set_parent(subgraph, owner, host)?;
        let name = self.graph_ref(subgraph)?.name.clone();
        self.node_mut(host)?.op.add_subgraph_instance_name(name);
        Ok(())
    }

    /// Unregisters the named subgraph and drops it together with its nodes and every
    /// subgraph those nodes host, directly or through nested hosts.
    pub fn remove_subgraph(&mut self, graph: GraphId, name: &str) -> Result<GraphId, GraphError> {
        let root = self.root_graph(graph)?;
        let sub = self
            .find_registered_subgraph(root, name)
            .ok_or_else(|| GraphError::UnknownSubgraph(name.to_string()))?;
        let mut hosted = Vec::new();
        for node in &self.graph_ref(sub)?.nodes {
            hosted.extend(self.node_ref(*node)?.op.subgraph_instance_names().iter().cloned());
        }
        let nested = self.collect_hosted_subgraphs(root, hosted)?;
        self.drop_registered_subgraph(root, name)?;
        for nested_name in nested {
            self.drop_registered_subgraph(root, &nested_name)?;
        }
        Ok(sub)
    }

    /// Registered names reachable from `names` through hosting nodes, outermost first.
    fn collect_hosted_subgraphs(&self, root: GraphId, mut names: Vec<String>) -> Result<Vec<String>, GraphError> {
        let mut doomed: Vec<String> = Vec::new();
        while let Some(name) = names.pop() {
            let Some(sub) = self.find_registered_subgraph(root, &name) else {
                continue;
            };
            if doomed.contains(&name) {
                continue;
            }
            if doomed.len() > self.graphs.len() {
                return Err(GraphError::DepthExceeded(self.graphs.len()));
            }
            doomed.push(name);
            for inner in &self.graph_ref(sub)?.nodes {
                names.extend(self.node_ref(*inner)?.op.subgraph_instance_names().iter().cloned());
            }
        }
        Ok(doomed)
    }

    fn drop_registered_subgraph(&mut self, root: GraphId, name: &str) -> Result<(), GraphError> {
        let Some(sub) = self.find_registered_subgraph(root, name) else {
            return Ok(());
        };
        self.graph_mut(root)?.subgraphs.retain(|(n, _)| n != name);
        if let Some(removed) = self.graphs.remove(&sub) {
            for node in removed.nodes {
                self.unlink_all(node)?;
                self.nodes.remove(&node);
            }
        }
        Ok(())
    }

    /// Drops every subgraph hosted by `node`, directly or through nested hosts.
    pub fn remove_subgraph_recursively(&mut self, node: NodeId) -> Result<(), GraphError> {
        let owner = self.node_ref(node)?.owner;
        let root = self.root_graph(owner)?;
        let names: Vec<String> = self.node_ref(node)?.op.subgraph_instance_names().to_vec();
        for name in self.collect_hosted_subgraphs(root, names)? {
            self.drop_registered_subgraph(root, &name)?;
        }
        let host = self.node_mut(node)?;
        for name in host.op.subgraph_instance_names().to_vec() {
            host.op.remove_subgraph_instance_name(&name);
        }
        Ok(())
    }

    /// Subgraphs reachable from the nodes of `graph`, skipping names that do not resolve.
    pub fn get_subgraphs_recursively(&self, graph: GraphId) -> Result<Vec<GraphId>, GraphError> {
        let root = self.root_graph(graph)?;
        let mut ret = Vec::new();
        let mut pending: Vec<(GraphId, usize)> = vec![(graph, 0)];
        while let Some((current, depth)) = pending.pop() {
            for node in &self.graph_ref(current)?.nodes {
                for name in self.node_ref(*node)?.op.subgraph_instance_names() {
                    let Some(sub) = self.find_registered_subgraph(root, name) else {
                        log::debug!("Subgraph {} referenced by {} is not registered", name, self.node_name(*node).unwrap_or_default());
                        continue;
                    };
                    if depth + 1 > DEFAULT_MAX_SUBGRAPH_DEPTH {
                        return Err(GraphError::DepthExceeded(DEFAULT_MAX_SUBGRAPH_DEPTH));
                    }
                    ret.push(sub);
                    pending.push((sub, depth + 1));
                }
            }
        }
        Ok(ret)
    }

    /// Exchanges names, node lists and subgraph maps of two graphs, then repairs
    /// node owners and the parent links of the exchanged subgraphs.
    pub fn swap(&mut self, a: GraphId, b: GraphId) -> Result<(), GraphError> {
        if a == b {
            return Err(GraphError::SelfSwap(a));
        }
        self.graph_ref(a)?;
        self.graph_ref(b)?;
        let mut graph_a = self.graphs.remove(&a).ok_or(GraphError::UnknownGraph(a))?;
        let graph_b = self.graphs.get_mut(&b).ok_or(GraphError::UnknownGraph(b))?;
        std::mem::swap(&mut graph_a.name, &mut graph_b.name);
        std::mem::swap(&mut graph_a.nodes, &mut graph_b.nodes);
        std::mem::swap(&mut graph_a.subgraphs, &mut graph_b.subgraphs);
        graph_a.invalidate();
        graph_b.invalidate();
        self.graphs.insert(a, graph_a);

        for (this, other) in [(a, b), (b, a)] {
            let g = self.graph_ref(this)?;
            let nodes = g.nodes.clone();
            let subgraphs: Vec<GraphId> = g.subgraphs.iter().map(|(_, id)| *id).collect();
            for node in nodes {
                self.node_mut(node)?.owner = this;
            }
            for sub in subgraphs {
                let sub_graph = self.graph_mut(sub)?;
                if sub_graph.parent_graph == Some(other) {
                    sub_graph.parent_graph = Some(this);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn set_direct_nodes(&mut self, graph: GraphId, nodes: Vec<NodeId>) -> Result<(), GraphError> {
        self.graph_mut(graph)?.nodes = nodes;
        Ok(())
    }

    /// Moves `node` out of its graph into `target` at `position` (appends when out of range).
    /// Edges are left alone; callers relink afterwards.
    pub(crate) fn move_node(&mut self, node: NodeId, target: GraphId, position: usize) -> Result<(), GraphError> {
        let from = self.node_ref(node)?.owner;
        self.graph_ref(target)?;
        {
            let g = self.graph_mut(from)?;
            g.nodes.retain(|x| *x != node);
            g.invalidate();
        }
        let g = self.graph_mut(target)?;
        let position = position.min(g.nodes.len());
        g.nodes.insert(position, node);
        g.invalidate();
        self.node_mut(node)?.owner = target;
        Ok(())
    }

    /// Stable-sorts the direct node list by the currently assigned ids.
    /// Nodes without an id keep their relative order at the end.
    pub fn reorder_by_node_id(&mut self, graph: GraphId) -> Result<(), GraphError> {
        let mut nodes = self.graph_ref(graph)?.nodes.clone();
        nodes.sort_by_key(|x| {
            self.nodes
                .get(x)
                .and_then(|n| n.topo_id)
                .unwrap_or(usize::MAX)
        });
        self.set_direct_nodes(graph, nodes)
    }
}

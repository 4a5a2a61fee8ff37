use crate::compute_graph::op_desc::{NodeRole, OpDesc};
use crate::compute_graph::GraphId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeId {
    inner: usize,
}

impl NodeId {
    pub(crate) fn new(inner: usize) -> Self {
        Self { inner }
    }

    pub fn output(self, index: usize) -> OutDataAnchor {
        OutDataAnchor { node: self, index }
    }

    pub fn input(self, index: usize) -> InDataAnchor {
        InDataAnchor { node: self, index }
    }

    pub fn control_out(self) -> Anchor {
        Anchor::OutControl(self)
    }

    pub fn control_in(self) -> Anchor {
        Anchor::InControl(self)
    }
}

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutDataAnchor {
    pub node: NodeId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct InDataAnchor {
    pub node: NodeId,
    pub index: usize,
}

/// Typed connection point on a node. Data anchors are indexed, control anchors are not.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Anchor {
    OutData(OutDataAnchor),
    InData(InDataAnchor),
    OutControl(NodeId),
    InControl(NodeId),
}

impl Anchor {
    pub fn node(&self) -> NodeId {
        match self {
            Anchor::OutData(x) => x.node,
            Anchor::InData(x) => x.node,
            Anchor::OutControl(x) => *x,
            Anchor::InControl(x) => *x,
        }
    }
}

impl From<OutDataAnchor> for Anchor {
    fn from(value: OutDataAnchor) -> Self {
        Anchor::OutData(value)
    }
}

impl From<InDataAnchor> for Anchor {
    fn from(value: InDataAnchor) -> Self {
        Anchor::InData(value)
    }
}

/// Peers of a single output anchor: data consumers first, then control consumers.
#[derive(Debug, Clone, Default)]
pub(crate) struct OutDataLinks {
    pub(crate) data: Vec<InDataAnchor>,
    pub(crate) control: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    pub(crate) op: OpDesc,
    role: NodeRole,
    pub(crate) owner: GraphId,
    pub(crate) topo_id: Option<usize>,
    pub(crate) in_data: Vec<Option<OutDataAnchor>>,
    pub(crate) out_data: Vec<OutDataLinks>,
    // Either `Anchor::OutControl` or `Anchor::OutData`.
    pub(crate) in_control: Vec<Anchor>,
    pub(crate) out_control: Vec<NodeId>,
}

impl Node {
    pub(crate) fn new(id: NodeId, op: OpDesc, owner: GraphId) -> Self {
        let role = NodeRole::from_op_type(op.op_type());
        let in_data = vec![None; op.input_count()];
        let out_data = vec![OutDataLinks::default(); op.output_count()];
        Self {
            id,
            op,
            role,
            owner,
            topo_id: None,
            in_data,
            out_data,
            in_control: Vec::new(),
            out_control: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.op.name
    }

    pub fn op_type(&self) -> &str {
        self.op.op_type()
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn op_desc(&self) -> &OpDesc {
        &self.op
    }

    pub fn owner(&self) -> GraphId {
        self.owner
    }

    /// Sequential id assigned by the last successful sort of the owning graph.
    pub fn topo_id(&self) -> Option<usize> {
        self.topo_id
    }

    pub fn input_count(&self) -> usize {
        self.in_data.len()
    }

    pub fn output_count(&self) -> usize {
        self.out_data.len()
    }

    pub fn peer_out_anchor(&self, index: usize) -> Option<OutDataAnchor> {
        self.in_data.get(index).copied().flatten()
    }

    pub fn peer_in_anchors(&self, index: usize) -> &[InDataAnchor] {
        self.out_data
            .get(index)
            .map(|x| x.data.as_slice())
            .unwrap_or(&[])
    }

    /// Control consumers attached directly to output `index`.
    pub fn peer_in_control_nodes(&self, index: usize) -> &[NodeId] {
        self.out_data
            .get(index)
            .map(|x| x.control.as_slice())
            .unwrap_or(&[])
    }

    /// Producers of connected data inputs, in input order (repeats preserved).
    pub fn in_data_nodes(&self) -> Vec<NodeId> {
        self.in_data.iter().flatten().map(|x| x.node).collect()
    }

    /// Consumers of every output, in output-then-peer order (repeats preserved).
    pub fn out_data_nodes(&self) -> Vec<NodeId> {
        self.out_data
            .iter()
            .flat_map(|x| x.data.iter().map(|y| y.node))
            .collect()
    }

    pub fn in_control_nodes(&self) -> Vec<NodeId> {
        let mut ret: Vec<NodeId> = Vec::new();
        for anchor in &self.in_control {
            let node = anchor.node();
            if !ret.contains(&node) {
                ret.push(node);
            }
        }
        ret
    }

    pub fn out_control_nodes(&self) -> Vec<NodeId> {
        let mut ret: Vec<NodeId> = Vec::new();
        for node in self
            .out_data
            .iter()
            .flat_map(|x| x.control.iter())
            .chain(self.out_control.iter())
        {
            if !ret.contains(node) {
                ret.push(*node);
            }
        }
        ret
    }

    /// Data plus control in-edges, counting data-to-control edges once each.
    pub fn in_edge_count(&self) -> usize {
        self.in_data.iter().flatten().count() + self.in_control.len()
    }

    pub fn out_edge_count(&self) -> usize {
        self.out_data
            .iter()
            .map(|x| x.data.len() + x.control.len())
            .sum::<usize>()
            + self.out_control.len()
    }

    /// All distinct predecessors, data inputs first.
    pub fn in_all_nodes(&self) -> Vec<NodeId> {
        let mut ret: Vec<NodeId> = Vec::new();
        for node in self.in_data_nodes().into_iter().chain(self.in_control_nodes()) {
            if !ret.contains(&node) {
                ret.push(node);
            }
        }
        ret
    }

    /// All distinct successors, data consumers first.
    pub fn out_all_nodes(&self) -> Vec<NodeId> {
        let mut ret: Vec<NodeId> = Vec::new();
        for node in self.out_data_nodes().into_iter().chain(self.out_control_nodes()) {
            if !ret.contains(&node) {
                ret.push(node);
            }
        }
        ret
    }

    /// Successor visitation order shared by every sorting policy: per output,
    /// data peers then control peers, then the control-out peers. Repeats are kept
    /// so each edge decrements its consumer once.
    pub(crate) fn successor_groups(&self) -> Vec<Vec<NodeId>> {
        let mut groups = Vec::with_capacity(self.out_data.len() + 1);
        for links in &self.out_data {
            let mut group: Vec<NodeId> = links.data.iter().map(|x| x.node).collect();
            group.extend(links.control.iter().copied());
            groups.push(group);
        }
        groups.push(self.out_control.clone());
        groups
    }
}

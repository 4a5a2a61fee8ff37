use crate::compute_graph::op_desc::{
    ATTR_NAME_NEXT_ITERATION, ATTR_NAME_NOPADDING_CONTINUOUS_INPUT, ATTR_NAME_NOPADDING_CONTINUOUS_OUTPUT,
    ATTR_NAME_OUTPUT_REUSE_INPUT, ATTR_NAME_PARENT_NODE_INDEX, ATTR_NAME_REF_VAR_SRC_VAR_NAME, ATTR_NAME_REFERENCE,
    ATTR_NAME_REUSE_INPUT, ATTR_NAME_REUSE_INPUT_INDEX,
};
use crate::compute_graph::{
    DEFAULT_MAX_SUBGRAPH_DEPTH, GraphArena, GraphError, GraphId, Node, NodeId, NodeRole, OutDataAnchor,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum RefMappingError {
    #[error("Boundary node {0} has no _parent_node_index attribute")]
    MissingParentIndex(String),
    #[error("Producer {producer} of {consumer} has no symbol yet; nodes must be walked in topological order")]
    UnresolvedProducer { producer: String, consumer: String },
    #[error("Host {host} of subgraph node {node} has no anchor {anchor}")]
    MissingHostAnchor {
        host: String,
        node: String,
        anchor: String,
    },
    #[error("Cannot merge unknown symbol {0}")]
    UnknownSymbol(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    pub walk_subgraphs: bool,
    pub max_subgraph_depth: usize,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            walk_subgraphs: true,
            max_subgraph_depth: DEFAULT_MAX_SUBGRAPH_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum IoType {
    #[strum(to_string = "in")]
    In,
    #[strum(to_string = "out")]
    Out,
}

/// One side of a data anchor, identified by node, index and direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIndexIO {
    pub node: NodeId,
    pub node_name: String,
    pub index: usize,
    pub io: IoType,
}

impl NodeIndexIO {
    pub fn new(node: &Node, index: usize, io: IoType) -> Self {
        Self {
            node: node.id(),
            node_name: node.name().to_string(),
            index,
            io,
        }
    }

    /// `{node}_in_{i}` or `{node}_out_{i}`.
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.node_name, self.io, self.index)
    }
}

/// Equivalence classes of anchors that denote the same storage. A symbol is named after
/// the anchor that founded its class.
///
/// An output resolved through `ref_var_src_var_name` keeps the singleton class it founded,
/// so it can appear in two `symbol_to_anchors` lists. `anchor_to_symbol` always names the
/// class it was resolved into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefMapping {
    pub symbol_to_anchors: BTreeMap<String, Vec<NodeIndexIO>>,
    pub anchor_to_symbol: BTreeMap<String, String>,
}

impl RefMapping {
    pub fn symbol_of(&self, anchor: &NodeIndexIO) -> Option<&str> {
        self.anchor_to_symbol.get(&anchor.key()).map(|x| x.as_str())
    }

    pub fn anchors_of(&self, symbol: &str) -> &[NodeIndexIO] {
        self.symbol_to_anchors
            .get(symbol)
            .map(|x| x.as_slice())
            .unwrap_or(&[])
    }

    pub fn symbol_count(&self) -> usize {
        self.symbol_to_anchors.len()
    }

    fn symbol_of_key(&self, key: &str) -> Option<String> {
        self.anchor_to_symbol.get(key).cloned()
    }

    fn found(&mut self, anchor: NodeIndexIO) -> String {
        let key = anchor.key();
        self.anchor_to_symbol.insert(key.clone(), key.clone());
        self.symbol_to_anchors.insert(key.clone(), vec![anchor]);
        key
    }

    fn join(&mut self, symbol: &str, anchor: NodeIndexIO) -> Result<(), RefMappingError> {
        let anchors = self
            .symbol_to_anchors
            .get_mut(symbol)
            .ok_or_else(|| RefMappingError::UnknownSymbol(symbol.to_string()))?;
        self.anchor_to_symbol.insert(anchor.key(), symbol.to_string());
        anchors.push(anchor);
        Ok(())
    }

    /// Merges two classes into the larger one (the first on ties) and returns its symbol.
    fn union(&mut self, a: &str, b: &str) -> Result<String, RefMappingError> {
        if a == b {
            return Ok(a.to_string());
        }
        let len_a = self.anchors_of_checked(a)?;
        let len_b = self.anchors_of_checked(b)?;
        let (keep, drop) = if len_b > len_a { (b, a) } else { (a, b) };
        let moved = self.symbol_to_anchors.remove(drop).unwrap_or_default();
        for anchor in &moved {
            self.anchor_to_symbol.insert(anchor.key(), keep.to_string());
        }
        self.symbol_to_anchors
            .get_mut(keep)
            .ok_or_else(|| RefMappingError::UnknownSymbol(keep.to_string()))?
            .extend(moved);
        Ok(keep.to_string())
    }

    fn anchors_of_checked(&self, symbol: &str) -> Result<usize, RefMappingError> {
        self.symbol_to_anchors
            .get(symbol)
            .map(|x| x.len())
            .ok_or_else(|| RefMappingError::UnknownSymbol(symbol.to_string()))
    }
}

struct Resolver<'a> {
    arena: &'a GraphArena,
    root: GraphId,
    mapping: RefMapping,
}

impl<'a> Resolver<'a> {
    fn producer_key(&self, producer: OutDataAnchor) -> Result<String, RefMappingError> {
        let node = self.arena.node_ref(producer.node)?;
        Ok(NodeIndexIO::new(node, producer.index, IoType::Out).key())
    }

    fn producer_symbol(&self, producer: OutDataAnchor, consumer: &NodeIndexIO) -> Result<String, RefMappingError> {
        let key = self.producer_key(producer)?;
        self.mapping
            .symbol_of_key(&key)
            .ok_or_else(|| RefMappingError::UnresolvedProducer {
                producer: key,
                consumer: consumer.key(),
            })
    }

    fn host_of(&self, node: &Node) -> Result<Option<&'a Node>, RefMappingError> {
        match self.arena.graph_ref(node.owner())?.parent_node() {
            Some(host) => Ok(Some(self.arena.node_ref(host)?)),
            None => Ok(None),
        }
    }

    fn handle_node(&mut self, node: &Node) -> Result<(), RefMappingError> {
        let host = self.host_of(node)?;
        match (node.role(), host) {
            (NodeRole::NetOutput, Some(host)) => self.handle_subgraph_output(node, host)?,
            (NodeRole::Data, Some(host)) => self.handle_subgraph_input(node, host)?,
            (NodeRole::Merge, _) => self.handle_merge_input(node)?,
            _ => self.handle_plain_input(node)?,
        }
        for index in 0..node.output_count() {
            self.handle_output(node, index, host.is_some())?;
        }
        Ok(())
    }

    fn handle_plain_input(&mut self, node: &Node) -> Result<(), RefMappingError> {
        for index in 0..node.input_count() {
            let anchor = NodeIndexIO::new(node, index, IoType::In);
            match node.peer_out_anchor(index) {
                Some(producer) => {
                    let symbol = self.producer_symbol(producer, &anchor)?;
                    self.mapping.join(&symbol, anchor)?;
                }
                None => {
                    self.mapping.found(anchor);
                }
            }
        }
        Ok(())
    }

    fn handle_subgraph_output(&mut self, node: &Node, host: &Node) -> Result<(), RefMappingError> {
        for index in 0..node.input_count() {
            let anchor = NodeIndexIO::new(node, index, IoType::In);
            let parent_index = node
                .op_desc()
                .input_desc(index)
                .and_then(|x| x.attrs.get_index(ATTR_NAME_PARENT_NODE_INDEX))
                .ok_or_else(|| RefMappingError::MissingParentIndex(node.name().to_string()))?;
            let Some(producer) = node.peer_out_anchor(index) else {
                self.mapping.found(anchor);
                continue;
            };
            let symbol = self.producer_symbol(producer, &anchor)?;
            let host_anchor = NodeIndexIO::new(host, parent_index, IoType::Out);
            let host_symbol = self.mapping.symbol_of_key(&host_anchor.key()).ok_or_else(|| {
                RefMappingError::MissingHostAnchor {
                    host: host.name().to_string(),
                    node: node.name().to_string(),
                    anchor: host_anchor.key(),
                }
            })?;
            let symbol = self.mapping.union(&symbol, &host_symbol)?;
            self.mapping.join(&symbol, anchor)?;
        }
        Ok(())
    }

    fn host_input_symbol(&self, node: &Node, host: &Node) -> Result<Option<String>, RefMappingError> {
        let parent_index = node
            .op_desc()
            .attrs
            .get_index(ATTR_NAME_PARENT_NODE_INDEX)
            .ok_or_else(|| RefMappingError::MissingParentIndex(node.name().to_string()))?;
        if parent_index >= host.input_count() {
            return Err(RefMappingError::MissingHostAnchor {
                host: host.name().to_string(),
                node: node.name().to_string(),
                anchor: NodeIndexIO::new(host, parent_index, IoType::In).key(),
            });
        }
        match host.peer_out_anchor(parent_index) {
            Some(producer) => Ok(self.mapping.symbol_of_key(&self.producer_key(producer)?)),
            // an unbound host input founded its own class when the host was walked
            None => Ok(self
                .mapping
                .symbol_of_key(&NodeIndexIO::new(host, parent_index, IoType::In).key())),
        }
    }

    fn handle_subgraph_input(&mut self, node: &Node, host: &Node) -> Result<(), RefMappingError> {
        let symbol = self.host_input_symbol(node, host)?;
        for index in 0..node.input_count() {
            let anchor = NodeIndexIO::new(node, index, IoType::In);
            match &symbol {
                Some(symbol) => self.mapping.join(symbol, anchor)?,
                None => {
                    self.mapping.found(anchor);
                }
            }
        }
        // a placeholder without an input anchor still forwards the host value
        if node.input_count() == 0 && node.output_count() > 0 {
            let anchor = NodeIndexIO::new(node, 0, IoType::Out);
            match symbol {
                Some(symbol) => self.mapping.join(&symbol, anchor)?,
                None => {
                    self.mapping.found(anchor);
                }
            }
        }
        Ok(())
    }

    fn handle_merge_input(&mut self, node: &Node) -> Result<(), RefMappingError> {
        let next_iteration = node.op_desc().attrs.get_str(ATTR_NAME_NEXT_ITERATION);
        let mut merged: Option<String> = None;
        let mut bound = Vec::new();
        let mut late = Vec::new();
        for index in 0..node.input_count() {
            let anchor = NodeIndexIO::new(node, index, IoType::In);
            let Some(producer) = node.peer_out_anchor(index) else {
                late.push(anchor);
                continue;
            };
            let producer_name = self.arena.node_ref(producer.node)?.name();
            if next_iteration == Some(producer_name) {
                late.push(anchor);
                continue;
            }
            let symbol = self.producer_symbol(producer, &anchor)?;
            merged = Some(match merged {
                Some(current) => self.mapping.union(&current, &symbol)?,
                None => symbol,
            });
            bound.push(anchor);
        }
        let mut pending = bound.into_iter().chain(late);
        let symbol = match merged {
            Some(symbol) => symbol,
            None => match pending.next() {
                Some(first) => self.mapping.found(first),
                None => return Ok(()),
            },
        };
        for anchor in pending {
            self.mapping.join(&symbol, anchor)?;
        }
        Ok(())
    }

    /// Input whose storage output `index` reuses, if any rule applies.
    fn reused_input(&self, node: &Node, index: usize, in_subgraph: bool) -> Option<usize> {
        let op = node.op_desc();
        let output_desc = op.output_desc(index)?;
        match node.role() {
            NodeRole::NetOutput | NodeRole::While => return Some(index),
            NodeRole::Data if in_subgraph => return Some(index),
            NodeRole::Merge if index == 0 => return Some(0),
            NodeRole::Reshape => return Some(0),
            _ => {}
        }
        if op.attrs.get_bool(ATTR_NAME_REFERENCE) == Some(true) {
            if let Some(input) = op.input_index_by_name(&output_desc.name) {
                return Some(input);
            }
        }
        if output_desc.attrs.get_bool(ATTR_NAME_REUSE_INPUT) == Some(true) {
            if let Some(input) = output_desc.attrs.get_index(ATTR_NAME_REUSE_INPUT_INDEX) {
                return Some(input);
            }
        }
        None
    }

    fn is_no_padding_reuse(node: &Node, index: usize) -> bool {
        let attrs = &node.op_desc().attrs;
        let continuous = attrs.get_bool(ATTR_NAME_NOPADDING_CONTINUOUS_INPUT) == Some(true)
            || attrs.get_bool(ATTR_NAME_NOPADDING_CONTINUOUS_OUTPUT) == Some(true);
        let reuse = node
            .op_desc()
            .output_desc(index)
            .and_then(|x| x.attrs.get_bool(ATTR_NAME_OUTPUT_REUSE_INPUT))
            == Some(true);
        continuous && reuse
    }

    /// Output-0 symbol of the variable named by `ref_var_src_var_name`, searched across the whole tree.
    fn ref_var_symbol(&self, node: &Node, index: usize) -> Option<String> {
        let var_name = node
            .op_desc()
            .output_desc(index)?
            .attrs
            .get_str(ATTR_NAME_REF_VAR_SRC_VAR_NAME)?;
        let var = self.arena.find_node_from_all_nodes(self.root, var_name)?;
        let var = self.arena.get_node(var)?;
        self.mapping
            .symbol_of_key(&NodeIndexIO::new(var, 0, IoType::Out).key())
    }

    fn handle_output(&mut self, node: &Node, index: usize, in_subgraph: bool) -> Result<(), RefMappingError> {
        let anchor = NodeIndexIO::new(node, index, IoType::Out);
        if self.mapping.symbol_of_key(&anchor.key()).is_some() {
            return Ok(());
        }
        let reused = self.reused_input(node, index, in_subgraph);
        if let Some(input) = reused.filter(|x| *x < node.input_count()) {
            let in_key = NodeIndexIO::new(node, input, IoType::In).key();
            if let Some(symbol) = self.mapping.symbol_of_key(&in_key) {
                return self.mapping.join(&symbol, anchor);
            }
        }
        if let Some(symbol) = self.ref_var_symbol(node, index) {
            // the founding entry stays behind while the anchor itself resolves to the variable
            self.mapping.found(anchor.clone());
            return self.mapping.join(&symbol, anchor);
        }
        if Self::is_no_padding_reuse(node, index) && node.input_count() > 0 {
            let in_key = NodeIndexIO::new(node, 0, IoType::In).key();
            if let Some(symbol) = self.mapping.symbol_of_key(&in_key) {
                return self.mapping.join(&symbol, anchor);
            }
        }
        self.mapping.found(anchor);
        Ok(())
    }
}

/// Computes anchor equivalence classes over `graph`, walking hosted subgraphs right after
/// their host. Node lists are expected in topological order.
pub fn get_ref_mapping(
    arena: &GraphArena,
    graph: GraphId,
    config: &AliasConfig,
) -> Result<RefMapping, RefMappingError> {
    let root = arena.root_graph(graph)?;
    let mut resolver = Resolver {
        arena,
        root,
        mapping: RefMapping::default(),
    };
    let walk_subgraphs = config.walk_subgraphs;
    arena.walk_all_nodes(
        graph,
        config.max_subgraph_depth,
        &|_, _, _| walk_subgraphs,
        |node, _| resolver.handle_node(node),
    )?;
    log::debug!(
        "Resolved {} symbols over {} anchors",
        resolver.mapping.symbol_to_anchors.len(),
        resolver.mapping.anchor_to_symbol.len()
    );
    Ok(resolver.mapping)
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ATTR_NAME_PARENT_NODE_INDEX: &str = "_parent_node_index";
pub const ATTR_NAME_SESSION_GRAPH_ID: &str = "_session_graph_id";
pub const ATTR_NAME_REFERENCE: &str = "reference";
pub const ATTR_NAME_REF_VAR_SRC_VAR_NAME: &str = "ref_var_src_var_name";
pub const ATTR_NAME_NOPADDING_CONTINUOUS_INPUT: &str = "_no_padding_continuous_input";
pub const ATTR_NAME_NOPADDING_CONTINUOUS_OUTPUT: &str = "_no_padding_continuous_output";
pub const ATTR_NAME_OUTPUT_REUSE_INPUT: &str = "_output_reuse_input";
pub const ATTR_NAME_REUSE_INPUT: &str = "reuse_input";
pub const ATTR_NAME_REUSE_INPUT_INDEX: &str = "reuse_input_index";
pub const ATTR_NAME_NEXT_ITERATION: &str = "_next_iteration_node";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    Strs(Vec<String>),
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(value: Vec<i64>) -> Self {
        AttrValue::Ints(value)
    }
}

/// Named attribute bag carried by graphs, op descriptors and tensor descriptors.
///
/// Keys are kept ordered so that anything derived from iterating the store is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrStore {
    attrs: BTreeMap<String, AttrValue>,
}

impl AttrStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<AttrValue> {
        self.attrs.remove(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(AttrValue::Int(x)) => Some(*x),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.attrs.get(name) {
            Some(AttrValue::Bool(x)) => Some(*x),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(AttrValue::Str(x)) => Some(x.as_str()),
            _ => None,
        }
    }

    /// Reads a non-negative integer attribute as an index.
    pub fn get_index(&self, name: &str) -> Option<usize> {
        self.get_int(name).and_then(|x| usize::try_from(x).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.attrs.iter()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// Closed set of node kinds the algorithms treat specially, parsed from the op type string.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
pub enum NodeRole {
    #[strum(to_string = "Data")]
    Data,
    #[strum(to_string = "NetOutput")]
    NetOutput,
    #[strum(to_string = "Merge", serialize = "StreamMerge")]
    Merge,
    #[strum(to_string = "Reshape")]
    Reshape,
    #[strum(to_string = "RefData")]
    RefData,
    #[strum(to_string = "Variable", serialize = "VariableV2")]
    Variable,
    #[strum(to_string = "Const", serialize = "Constant")]
    Constant,
    #[strum(to_string = "PartitionedCall", serialize = "StatefulPartitionedCall")]
    PartitionedCall,
    #[strum(to_string = "While", serialize = "_While", serialize = "StatelessWhile")]
    While,
    #[strum(to_string = "Send")]
    Send,
    #[strum(to_string = "Recv")]
    Recv,
    #[strum(to_string = "AtomicAddrClean")]
    AtomicAddrClean,
    #[strum(to_string = "Other")]
    Other,
}

impl NodeRole {
    pub fn from_op_type(op_type: &str) -> Self {
        op_type.parse().unwrap_or(NodeRole::Other)
    }

    /// Producers whose outputs stay alive for the whole execution.
    pub fn is_long_life(self) -> bool {
        matches!(self, NodeRole::Variable | NodeRole::Constant)
    }

    /// Output `i` always aliases input `i`.
    pub fn is_pass_through(self) -> bool {
        matches!(self, NodeRole::NetOutput | NodeRole::While)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub name: String,
    pub attrs: AttrStore,
}

impl TensorDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: AttrStore::new(),
        }
    }
}

/// Operator description owned by a node: type tag, attributes, per-port tensor
/// descriptors and the instance names of hosted subgraphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    pub name: String,
    op_type: String,
    pub attrs: AttrStore,
    input_descs: Vec<TensorDesc>,
    output_descs: Vec<TensorDesc>,
    subgraph_instance_names: Vec<String>,
}

impl OpDesc {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            attrs: AttrStore::new(),
            input_descs: Vec::new(),
            output_descs: Vec::new(),
            subgraph_instance_names: Vec::new(),
        }
    }

    /// Descriptor with `inputs` inputs named `x{i}` and `outputs` outputs named `y{i}`.
    pub fn with_ports(
        name: impl Into<String>,
        op_type: impl Into<String>,
        inputs: usize,
        outputs: usize,
    ) -> Self {
        let mut op = Self::new(name, op_type);
        for i in 0..inputs {
            op.add_input_desc(TensorDesc::new(format!("x{i}")));
        }
        for i in 0..outputs {
            op.add_output_desc(TensorDesc::new(format!("y{i}")));
        }
        op
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn add_input_desc(&mut self, desc: TensorDesc) -> usize {
        self.input_descs.push(desc);
        self.input_descs.len() - 1
    }

    pub fn add_output_desc(&mut self, desc: TensorDesc) -> usize {
        self.output_descs.push(desc);
        self.output_descs.len() - 1
    }

    pub fn input_count(&self) -> usize {
        self.input_descs.len()
    }

    pub fn output_count(&self) -> usize {
        self.output_descs.len()
    }

    pub fn input_desc(&self, index: usize) -> Option<&TensorDesc> {
        self.input_descs.get(index)
    }

    pub fn input_desc_mut(&mut self, index: usize) -> Option<&mut TensorDesc> {
        self.input_descs.get_mut(index)
    }

    pub fn output_desc(&self, index: usize) -> Option<&TensorDesc> {
        self.output_descs.get(index)
    }

    pub fn output_desc_mut(&mut self, index: usize) -> Option<&mut TensorDesc> {
        self.output_descs.get_mut(index)
    }

    pub fn input_descs(&self) -> &[TensorDesc] {
        &self.input_descs
    }

    pub fn output_descs(&self) -> &[TensorDesc] {
        &self.output_descs
    }

    pub fn input_index_by_name(&self, name: &str) -> Option<usize> {
        self.input_descs.iter().position(|x| x.name == name)
    }

    pub fn subgraph_instance_names(&self) -> &[String] {
        &self.subgraph_instance_names
    }

    pub fn add_subgraph_instance_name(&mut self, name: impl Into<String>) {
        self.subgraph_instance_names.push(name.into());
    }

    pub fn remove_subgraph_instance_name(&mut self, name: &str) {
        self.subgraph_instance_names.retain(|x| x != name);
    }
}

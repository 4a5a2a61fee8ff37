pub mod compute_graph;
pub mod observer;
pub mod ref_mapping;
pub mod subgraph_transform;
pub mod topo_sort;

pub use compute_graph::builder::GraphBuilder;
pub use compute_graph::{
    Anchor, AttrStore, AttrValue, ComputeGraph, GraphArena, GraphError, GraphId, InDataAnchor, Node, NodeId,
    NodeRole, OpDesc, OutDataAnchor, TensorDesc,
};
pub use observer::GraphObserver;
pub use ref_mapping::{AliasConfig, IoType, NodeIndexIO, RefMapping, RefMappingError, get_ref_mapping};
pub use subgraph_transform::{
    SubgraphTransformError, UnfoldConfig, build_subgraph_with_nodes, unfold_subgraph,
};
pub use topo_sort::{TopoSortConfig, TopoSortError, TopoSortingMode, topological_sorting};

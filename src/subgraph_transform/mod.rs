mod outline;
mod unfold;

use crate::compute_graph::{DEFAULT_MAX_SUBGRAPH_DEPTH, GraphError};
use serde::{Deserialize, Serialize};

pub use outline::{build_subgraph_with_nodes, build_subgraph_with_nodes_with_observer};
pub use unfold::{unfold_subgraph, unfold_subgraph_with_observer};

pub const PARTITIONED_CALL_TYPE: &str = "PartitionedCall";
pub const DATA_TYPE: &str = "Data";
pub const NET_OUTPUT_TYPE: &str = "NetOutput";

#[derive(Debug, thiserror::Error)]
pub enum SubgraphTransformError {
    #[error("Graph {0} has no _session_graph_id attribute, refusing to outline")]
    MissingSessionGraphId(String),
    #[error("No nodes given to outline into {0}")]
    EmptyNodeSet(String),
    #[error("Nodes selected for {subgraph} are not convex: {node} lies on a path that leaves and re-enters the set")]
    NonConvexNodeSet { subgraph: String, node: String },
    #[error("Subgraph name {0} is already taken")]
    DuplicateSubgraphName(String),
    #[error("Subgraph {0} was rejected by the unfold filter")]
    FilterRejected(String),
    #[error("Boundary node {node} of subgraph {subgraph} has no _parent_node_index")]
    MissingBoundaryAttr { subgraph: String, node: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnfoldConfig {
    pub max_subgraph_depth: usize,
}

impl Default for UnfoldConfig {
    fn default() -> Self {
        Self {
            max_subgraph_depth: DEFAULT_MAX_SUBGRAPH_DEPTH,
        }
    }
}

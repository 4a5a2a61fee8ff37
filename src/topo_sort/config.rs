use crate::compute_graph::DEFAULT_MAX_SUBGRAPH_DEPTH;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const OPTION_TOPO_SORTING_MODE: &str = "ge.topoSortingMode";
pub const OPTION_MEMORY_OPTIMIZATION_POLICY: &str = "ge.exec.memoryOptimizationPolicy";
pub const OPTION_GRAPH_RUN_MODE: &str = "ge.graphRunMode";
pub const MEMORY_PRIORITY: &str = "MemoryPriority";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
pub enum TopoSortingMode {
    Bfs,
    Dfs,
    DfsPostorder,
}

impl TopoSortingMode {
    /// Parses the numeric option value. Out-of-range values read as unset.
    pub fn from_option(value: &str) -> Option<Self> {
        match value.trim() {
            "0" => Some(TopoSortingMode::Bfs),
            "1" => Some(TopoSortingMode::Dfs),
            "2" => Some(TopoSortingMode::DfsPostorder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum_macros::Display)]
pub enum RunMode {
    Train,
    #[default]
    Inference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopoSortConfig {
    pub mode: Option<TopoSortingMode>,
    pub memory_priority: bool,
    pub delay_stateful_producers: bool,
    pub run_mode: RunMode,
    pub reverse_dfs: bool,
    pub reorder_event_nodes: bool,
    pub max_subgraph_depth: usize,
}

impl Default for TopoSortConfig {
    fn default() -> Self {
        Self {
            mode: None,
            memory_priority: false,
            delay_stateful_producers: false,
            run_mode: RunMode::default(),
            reverse_dfs: false,
            reorder_event_nodes: false,
            max_subgraph_depth: DEFAULT_MAX_SUBGRAPH_DEPTH,
        }
    }
}

/// The policy a sort actually runs with, after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedSortMode {
    Bfs,
    Dfs { memory_priority: bool },
    DfsPostorder { delay_stateful_producers: bool },
}

impl TopoSortConfig {
    pub fn with_mode(mode: TopoSortingMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    /// Builds a config from raw session options.
    pub fn from_options(options: &HashMap<String, String>) -> Self {
        let mode = options
            .get(OPTION_TOPO_SORTING_MODE)
            .and_then(|x| TopoSortingMode::from_option(x));
        let memory_priority = options
            .get(OPTION_MEMORY_OPTIMIZATION_POLICY)
            .is_some_and(|x| x == MEMORY_PRIORITY);
        let run_mode = match options.get(OPTION_GRAPH_RUN_MODE).map(|x| x.trim()) {
            Some("1") => RunMode::Train,
            _ => RunMode::Inference,
        };
        Self {
            mode,
            memory_priority,
            delay_stateful_producers: memory_priority,
            run_mode,
            ..Self::default()
        }
    }

    pub fn resolve(&self) -> ResolvedSortMode {
        match (self.mode, self.run_mode) {
            (Some(TopoSortingMode::Bfs), _) => ResolvedSortMode::Bfs,
            (Some(TopoSortingMode::Dfs), _) => ResolvedSortMode::Dfs {
                memory_priority: self.memory_priority,
            },
            (Some(TopoSortingMode::DfsPostorder), _) => ResolvedSortMode::DfsPostorder {
                delay_stateful_producers: self.delay_stateful_producers,
            },
            (None, RunMode::Train) => ResolvedSortMode::Bfs,
            (None, RunMode::Inference) if self.memory_priority => ResolvedSortMode::Dfs {
                memory_priority: true,
            },
            (None, RunMode::Inference) => ResolvedSortMode::Bfs,
        }
    }
}

pub mod config;
mod kahn;
mod postorder;

use crate::compute_graph::{GraphArena, GraphError, GraphId, NodeId, NodeRole};
use crate::observer::GraphObserver;
pub use config::{ResolvedSortMode, RunMode, TopoSortConfig, TopoSortingMode};
use kahn::Frontier;
use postorder::PostorderOutcome;

#[derive(Debug, thiserror::Error)]
pub enum TopoSortError {
    #[error("Graph {graph} has a cycle: only {sorted} of {total} nodes could be ordered")]
    Cycle {
        graph: String,
        sorted: usize,
        total: usize,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Orders `graph` and, for a root graph, every subgraph registered under it.
/// Nothing is written until every graph has been ordered, so a cycle anywhere leaves
/// all node lists and ids as they were.
pub fn topological_sorting(
    arena: &mut GraphArena,
    graph: GraphId,
    config: &TopoSortConfig,
) -> Result<(), TopoSortError> {
    topological_sorting_with_observer(arena, graph, config, &mut ())
}

pub fn topological_sorting_with_observer<T: GraphObserver>(
    arena: &mut GraphArena,
    graph: GraphId,
    config: &TopoSortConfig,
    observer: &mut T,
) -> Result<(), TopoSortError> {
    let mut targets = vec![graph];
    if arena.graph_ref(graph)?.is_root() {
        targets.extend(arena.get_all_subgraphs(graph)?);
    }
    let mut orders = Vec::with_capacity(targets.len());
    for target in targets {
        let depth = subgraph_depth(arena, target)?;
        if depth > config.max_subgraph_depth {
            return Err(GraphError::DepthExceeded(config.max_subgraph_depth).into());
        }
        let mut order = order_graph(arena, target, config)?;
        if config.reorder_event_nodes {
            reorder_event_order(arena, &mut order)?;
        }
        orders.push((target, order));
    }

    for (target, order) in orders {
        commit_order(arena, target, order, observer)?;
    }
    Ok(())
}

fn subgraph_depth(arena: &GraphArena, graph: GraphId) -> Result<usize, GraphError> {
    let mut depth = 0;
    let mut current = graph;
    while let Some(parent) = arena.graph_ref(current)?.parent_graph() {
        depth += 1;
        if depth > arena.graph_count() {
            return Err(GraphError::DepthExceeded(depth));
        }
        current = parent;
    }
    Ok(depth)
}

fn order_graph(arena: &GraphArena, graph: GraphId, config: &TopoSortConfig) -> Result<Vec<NodeId>, TopoSortError> {
    let mode = config.resolve();
    let reverse = config.reverse_dfs;
    let total = arena.get_direct_node(graph)?.len();
    log::debug!(
        "Sorting graph {} ({} nodes) with {:?}",
        arena.graph_ref(graph)?.name(),
        total,
        mode
    );
    let sorted = match mode {
        ResolvedSortMode::Bfs => Ok(kahn::sort(arena, graph, Frontier::Bfs)?),
        ResolvedSortMode::Dfs {
            memory_priority: false,
        } => Ok(kahn::sort(arena, graph, Frontier::Dfs { reverse })?),
        ResolvedSortMode::Dfs {
            memory_priority: true,
        } => Ok(kahn::sort(arena, graph, Frontier::PriorityDfs { reverse })?),
        ResolvedSortMode::DfsPostorder {
            delay_stateful_producers,
        } => match postorder::sort(arena, graph, delay_stateful_producers)? {
            PostorderOutcome::Sorted(order) => Ok(order),
            PostorderOutcome::Cycle { sorted } => Err(sorted),
        },
    };
    match sorted {
        Ok(order) if order.len() == total => Ok(order),
        Ok(order) => Err(cycle_error(arena, graph, order.len(), total)),
        Err(sorted) => Err(cycle_error(arena, graph, sorted, total)),
    }
}

fn cycle_error(arena: &GraphArena, graph: GraphId, sorted: usize, total: usize) -> TopoSortError {
    let name = arena.graph_name(graph).unwrap_or_default().to_string();
    log::warn!("Graph {name} has a cycle, {sorted} of {total} nodes ordered");
    TopoSortError::Cycle {
        graph: name,
        sorted,
        total,
    }
}

fn commit_order<T: GraphObserver>(
    arena: &mut GraphArena,
    graph: GraphId,
    order: Vec<NodeId>,
    observer: &mut T,
) -> Result<(), GraphError> {
    for (i, node) in order.iter().enumerate() {
        arena.set_node_topo_id(*node, Some(i))?;
        observer.on_node_ordered(graph, *node, i);
    }
    arena.set_direct_nodes(graph, order)?;
    arena.graph_mut(graph)?.mark_valid();
    Ok(())
}

fn position_of(order: &[NodeId], node: NodeId) -> Option<usize> {
    order.iter().position(|x| *x == node)
}

fn reorder_event_order(arena: &GraphArena, order: &mut Vec<NodeId>) -> Result<(), GraphError> {
    let events: Vec<NodeId> = order.clone();
    for node_id in events {
        let node = arena.node_ref(node_id)?;
        match node.role() {
            NodeRole::Recv => {
                if node.out_control_nodes().is_empty() {
                    log::warn!("Recv node {} has no control successor, left in place", node.name());
                    continue;
                }
                order.retain(|x| *x != node_id);
                // the earliest consumer bounds the move, control or data
                let position = node
                    .out_all_nodes()
                    .into_iter()
                    .filter_map(|x| position_of(order, x))
                    .min()
                    .unwrap_or(order.len());
                order.insert(position, node_id);
            }
            NodeRole::Send => {
                if node.in_control_nodes().is_empty() {
                    log::warn!("Send node {} has no control predecessor, left in place", node.name());
                    continue;
                }
                order.retain(|x| *x != node_id);
                let position = node
                    .in_all_nodes()
                    .into_iter()
                    .filter_map(|x| position_of(order, x))
                    .max()
                    .map(|x| x + 1)
                    .unwrap_or(0);
                order.insert(position, node_id);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Pulls every Recv node right in front of its earliest placed successor and every Send
/// node right behind its latest placed predecessor, then renumbers the graph. Nodes
/// without a control peer on the relevant side stay where they are.
pub fn reorder_event_nodes(arena: &mut GraphArena, graph: GraphId) -> Result<(), GraphError> {
    let was_valid = arena.graph_ref(graph)?.is_valid();
    let mut order = arena.get_direct_node(graph)?.to_vec();
    reorder_event_order(arena, &mut order)?;
    commit_order(arena, graph, order, &mut ())?;
    if !was_valid {
        arena.invalidate(graph);
    }
    Ok(())
}

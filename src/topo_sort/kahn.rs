use crate::compute_graph::{GraphArena, GraphError, GraphId, NodeId, NodeRole};
use std::collections::{HashMap, VecDeque};

/// How newly ready nodes enter the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Frontier {
    Bfs,
    Dfs { reverse: bool },
    PriorityDfs { reverse: bool },
}

/// Ready-set driven ordering. Returns the emitted order; a result shorter than the
/// node count means the remainder sits on a cycle.
pub(crate) fn sort(arena: &GraphArena, graph: GraphId, frontier: Frontier) -> Result<Vec<NodeId>, GraphError> {
    let nodes = arena.get_direct_node(graph)?;
    let mut in_degree: HashMap<NodeId, usize> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        in_degree.insert(*node, arena.node_ref(*node)?.in_edge_count());
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut ready: VecDeque<NodeId> = VecDeque::new();
    let mut seeds = match frontier {
        Frontier::Bfs | Frontier::Dfs { .. } => sort_nodes(arena, nodes, &in_degree)?,
        Frontier::PriorityDfs { .. } => nodes
            .iter()
            .filter(|x| in_degree.get(x) == Some(&0))
            .copied()
            .collect(),
    };
    if !matches!(frontier, Frontier::Bfs) {
        ready.extend(seeds.drain(..));
    }

    loop {
        if ready.is_empty() {
            match seeds.pop() {
                Some(seed) => ready.push_back(seed),
                None => break,
            }
        }
        let Some(node) = ready.pop_back() else {
            break;
        };
        order.push(node);
        match frontier {
            Frontier::Bfs | Frontier::PriorityDfs { reverse: false } => {
                for succ in collect_breadth_out_node(arena, node, &mut in_degree)? {
                    ready.push_front(succ);
                }
            }
            Frontier::PriorityDfs { reverse: true } => {
                for succ in collect_breadth_out_node(arena, node, &mut in_degree)?.into_iter().rev() {
                    ready.push_back(succ);
                }
            }
            Frontier::Dfs { reverse } => {
                for group in arena.node_ref(node)?.successor_groups() {
                    let mut group_ready = Vec::new();
                    for succ in group {
                        if release(&mut in_degree, succ) {
                            group_ready.push(succ);
                        }
                    }
                    if reverse {
                        group_ready.reverse();
                    }
                    ready.extend(group_ready);
                }
            }
        }
    }
    Ok(order)
}

fn release(in_degree: &mut HashMap<NodeId, usize>, node: NodeId) -> bool {
    match in_degree.get_mut(&node) {
        Some(count) if *count > 0 => {
            *count -= 1;
            *count == 0
        }
        _ => false,
    }
}

/// Initial stack of zero in-degree nodes, arranged so popping from the back yields the
/// Data nodes first and then every other source, each group in declared order.
pub(crate) fn sort_nodes(
    arena: &GraphArena,
    nodes: &[NodeId],
    in_degree: &HashMap<NodeId, usize>,
) -> Result<Vec<NodeId>, GraphError> {
    let mut data = Vec::new();
    let mut others = Vec::new();
    for node in nodes {
        if in_degree.get(node) != Some(&0) {
            continue;
        }
        if arena.node_ref(*node)?.role() == NodeRole::Data {
            data.push(*node);
        } else {
            others.push(*node);
        }
    }
    Ok(others.into_iter().rev().chain(data.into_iter().rev()).collect())
}

/// Releases every successor edge of `node` and returns the successors that became
/// ready, ordered by name (then handle) so identical graphs sort identically.
pub(crate) fn collect_breadth_out_node(
    arena: &GraphArena,
    node: NodeId,
    in_degree: &mut HashMap<NodeId, usize>,
) -> Result<Vec<NodeId>, GraphError> {
    let mut ready = Vec::new();
    for group in arena.node_ref(node)?.successor_groups() {
        for succ in group {
            if release(in_degree, succ) {
                ready.push(succ);
            }
        }
    }
    let mut named = Vec::with_capacity(ready.len());
    for succ in ready {
        named.push((arena.node_ref(succ)?.name(), succ));
    }
    named.sort();
    Ok(named.into_iter().map(|(_, x)| x).collect())
}

use super::{SubgraphTransformError, UnfoldConfig};
use crate::compute_graph::op_desc::ATTR_NAME_PARENT_NODE_INDEX;
use crate::compute_graph::{GraphArena, GraphError, GraphId, InDataAnchor, NodeId, NodeRole, OutDataAnchor};
use crate::observer::GraphObserver;
use std::collections::{HashMap, HashSet};

/// Everything needed to inline one subgraph, computed before anything is touched.
struct InlinePlan {
    parent: GraphId,
    host: NodeId,
    moved: Vec<NodeId>,
    boundary: Vec<NodeId>,
    data_edges: Vec<(OutDataAnchor, InDataAnchor)>,
    control_edges: Vec<(NodeId, NodeId)>,
}

fn missing_attr(arena: &GraphArena, subgraph: GraphId, node: NodeId) -> SubgraphTransformError {
    SubgraphTransformError::MissingBoundaryAttr {
        subgraph: arena.graph_name(subgraph).unwrap_or_default().to_string(),
        node: arena.node_name(node).unwrap_or_default().to_string(),
    }
}

impl InlinePlan {
    fn build(arena: &GraphArena, subgraph: GraphId) -> Result<Option<Self>, SubgraphTransformError> {
        let g = arena.graph_ref(subgraph)?;
        let (Some(parent), Some(host)) = (g.parent_graph(), g.parent_node()) else {
            return Ok(None);
        };
        let host_node = arena.node_ref(host)?;

        // boundary Data -> producer of the matching host input
        let mut data_nodes: Vec<(NodeId, Option<OutDataAnchor>)> = Vec::new();
        // (NetOutput, input, host output)
        let mut outputs: Vec<(NodeId, usize, usize)> = Vec::new();
        let mut net_outputs = Vec::new();
        let mut moved = Vec::new();
        for id in g.direct_nodes() {
            let node = arena.node_ref(*id)?;
            match node.role() {
                NodeRole::Data => {
                    let index = node
                        .op_desc()
                        .attrs
                        .get_index(ATTR_NAME_PARENT_NODE_INDEX)
                        .ok_or_else(|| missing_attr(arena, subgraph, *id))?;
                    if index >= host_node.input_count() {
                        return Err(GraphError::InvalidAnchor(host.input(index).into()).into());
                    }
                    data_nodes.push((*id, host_node.peer_out_anchor(index)));
                }
                NodeRole::NetOutput => {
                    for j in 0..node.input_count() {
                        let index = node
                            .op_desc()
                            .input_desc(j)
                            .and_then(|x| x.attrs.get_index(ATTR_NAME_PARENT_NODE_INDEX))
                            .ok_or_else(|| missing_attr(arena, subgraph, *id))?;
                        if index >= host_node.output_count() {
                            return Err(GraphError::InvalidAnchor(host.output(index).into()).into());
                        }
                        outputs.push((*id, j, index));
                    }
                    net_outputs.push(*id);
                }
                _ => moved.push(*id),
            }
        }
        let moved_set: HashSet<NodeId> = moved.iter().copied().collect();
        let data_map: HashMap<NodeId, Option<OutDataAnchor>> = data_nodes.iter().copied().collect();
        let to_outer = |anchor: OutDataAnchor| match data_map.get(&anchor.node) {
            Some(producer) => *producer,
            None => Some(anchor),
        };

        let mut data_edges = Vec::new();
        let mut control_edges = Vec::new();
        for (data, producer) in &data_nodes {
            let Some(producer) = producer else {
                continue;
            };
            let node = arena.node_ref(*data)?;
            for i in 0..node.output_count() {
                for consumer in node.peer_in_anchors(i) {
                    if moved_set.contains(&consumer.node) {
                        data_edges.push((*producer, *consumer));
                    }
                }
            }
            for successor in node.out_control_nodes() {
                if moved_set.contains(&successor) {
                    control_edges.push((producer.node, successor));
                }
            }
        }

        let host_in_control = host_node.in_control_nodes();
        for id in &moved {
            let has_inner_pred = arena
                .node_ref(*id)?
                .in_all_nodes()
                .iter()
                .any(|x| moved_set.contains(x));
            if !has_inner_pred {
                for src in &host_in_control {
                    control_edges.push((*src, *id));
                }
            }
        }

        let host_out_control = host_node.out_control_nodes();
        for (net, j, index) in &outputs {
            let Some(producer) = arena.node_ref(*net)?.peer_out_anchor(*j).and_then(to_outer) else {
                continue;
            };
            for consumer in host_node.peer_in_anchors(*index) {
                data_edges.push((producer, *consumer));
            }
            for dst in &host_out_control {
                control_edges.push((producer.node, *dst));
            }
        }
        for net in &net_outputs {
            for src in arena.node_ref(*net)?.in_control_nodes() {
                let src = match data_map.get(&src) {
                    Some(producer) => producer.map(|x| x.node),
                    None => Some(src),
                };
                let Some(src) = src else {
                    continue;
                };
                for dst in &host_out_control {
                    control_edges.push((src, *dst));
                }
            }
        }

        let mut boundary: Vec<NodeId> = data_nodes.iter().map(|(x, _)| *x).collect();
        boundary.extend(net_outputs);
        Ok(Some(Self {
            parent,
            host,
            moved,
            boundary,
            data_edges,
            control_edges,
        }))
    }
}

fn inline_one<T: GraphObserver>(
    arena: &mut GraphArena,
    subgraph: GraphId,
    observer: &mut T,
) -> Result<Vec<GraphId>, SubgraphTransformError> {
    let Some(plan) = InlinePlan::build(arena, subgraph)? else {
        return Ok(Vec::new());
    };
    let name = arena.graph_ref(subgraph)?.name().to_string();

    for node in plan.boundary.iter().chain(std::iter::once(&plan.host)) {
        arena.unlink_all(*node)?;
    }
    let position = arena
        .get_direct_node(plan.parent)?
        .iter()
        .position(|x| *x == plan.host)
        .ok_or_else(|| GraphError::UnknownNode(plan.host))?;
    for (k, node) in plan.moved.iter().enumerate() {
        arena.move_node(*node, plan.parent, position + k)?;
        observer.on_node_moved(*node, subgraph, plan.parent);
    }
    for (src, dst) in &plan.data_edges {
        arena.add_edge(*src, *dst)?;
    }
    for (src, dst) in &plan.control_edges {
        arena.ensure_control_edge(*src, *dst)?;
    }

    for node in &plan.boundary {
        let node_name = arena.node_ref(*node)?.name().to_string();
        arena.remove_node(subgraph, *node)?;
        observer.on_node_removed(subgraph, *node, &node_name);
    }

    let mut nested = Vec::new();
    for node in &plan.moved {
        let hosted = arena.node_ref(*node)?.op_desc().subgraph_instance_names().to_vec();
        for hosted_name in hosted {
            if let Some(hosted_graph) = arena.get_subgraph(plan.parent, &hosted_name) {
                arena.set_parent(hosted_graph, plan.parent, *node)?;
                nested.push(hosted_graph);
            }
        }
    }

    arena.remove_subgraph(plan.parent, &name)?;
    // the host may carry further subgraphs besides the one just inlined
    arena.remove_subgraph_recursively(plan.host)?;
    let host_name = arena.node_ref(plan.host)?.name().to_string();
    arena.remove_node(plan.parent, plan.host)?;
    observer.on_node_removed(plan.parent, plan.host, &host_name);

    log::info!(
        "Unfolded subgraph {} into {}: moved {} nodes, removed call node {}",
        name,
        arena.graph_name(plan.parent).unwrap_or_default(),
        plan.moved.len(),
        host_name
    );
    Ok(nested)
}

/// Inlines `subgraph` into its parent graph in place of its call node. Subgraphs hosted by
/// the inlined nodes are inlined too when `filter` accepts them, and re-parented otherwise.
pub fn unfold_subgraph(
    arena: &mut GraphArena,
    subgraph: GraphId,
    filter: &dyn Fn(&GraphArena, GraphId) -> bool,
    config: &UnfoldConfig,
) -> Result<(), SubgraphTransformError> {
    unfold_subgraph_with_observer(arena, subgraph, filter, config, &mut ())
}

pub fn unfold_subgraph_with_observer<T: GraphObserver>(
    arena: &mut GraphArena,
    subgraph: GraphId,
    filter: &dyn Fn(&GraphArena, GraphId) -> bool,
    config: &UnfoldConfig,
    observer: &mut T,
) -> Result<(), SubgraphTransformError> {
    let g = arena.graph_ref(subgraph)?;
    if g.is_root() {
        log::debug!("Graph {} is a root graph, nothing to unfold", g.name());
        return Ok(());
    }
    if !filter(arena, subgraph) {
        return Err(SubgraphTransformError::FilterRejected(g.name().to_string()));
    }
    let mut pending = vec![(subgraph, 0usize)];
    while let Some((current, depth)) = pending.pop() {
        for nested in inline_one(arena, current, observer)? {
            if !filter(arena, nested) {
                continue;
            }
            if depth + 1 > config.max_subgraph_depth {
                return Err(GraphError::DepthExceeded(config.max_subgraph_depth).into());
            }
            pending.push((nested, depth + 1));
        }
    }
    Ok(())
}

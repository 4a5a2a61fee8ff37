use super::{DATA_TYPE, NET_OUTPUT_TYPE, PARTITIONED_CALL_TYPE, SubgraphTransformError};
use crate::compute_graph::op_desc::{ATTR_NAME_PARENT_NODE_INDEX, ATTR_NAME_SESSION_GRAPH_ID};
use crate::compute_graph::{
    Anchor, AttrValue, GraphArena, GraphError, GraphId, InDataAnchor, NodeId, OpDesc, OutDataAnchor,
};
use crate::observer::GraphObserver;
use std::collections::HashSet;

/// Edges crossing the border of the node set, grouped the way the call node will expose them.
#[derive(Default)]
struct Boundary {
    inputs: Vec<OutDataAnchor>,
    input_uses: Vec<Vec<InDataAnchor>>,
    outputs: Vec<OutDataAnchor>,
    output_uses: Vec<Vec<InDataAnchor>>,
    control_in: Vec<NodeId>,
    control_out: Vec<NodeId>,
    // members with control successors outside the set
    control_exits: Vec<NodeId>,
    crossing: Vec<(Anchor, Anchor)>,
}

fn push_unique(list: &mut Vec<NodeId>, node: NodeId) {
    if !list.contains(&node) {
        list.push(node);
    }
}

impl Boundary {
    fn collect(arena: &GraphArena, members: &[NodeId], set: &HashSet<NodeId>) -> Result<Self, GraphError> {
        let mut ret = Self::default();
        for member in members {
            for (src, dst) in arena.edges_of(*member)? {
                let src_inside = set.contains(&src.node());
                let dst_inside = set.contains(&dst.node());
                if src_inside && dst_inside {
                    continue;
                }
                match (src, dst) {
                    (Anchor::OutData(out), Anchor::InData(input)) if dst_inside => {
                        let index = match ret.inputs.iter().position(|x| *x == out) {
                            Some(index) => index,
                            None => {
                                ret.inputs.push(out);
                                ret.input_uses.push(Vec::new());
                                ret.inputs.len() - 1
                            }
                        };
                        ret.input_uses[index].push(input);
                    }
                    (Anchor::OutData(out), Anchor::InData(input)) => {
                        let index = match ret.outputs.iter().position(|x| *x == out) {
                            Some(index) => index,
                            None => {
                                ret.outputs.push(out);
                                ret.output_uses.push(Vec::new());
                                ret.outputs.len() - 1
                            }
                        };
                        ret.output_uses[index].push(input);
                    }
                    (src, Anchor::InControl(_)) if dst_inside => push_unique(&mut ret.control_in, src.node()),
                    (_, Anchor::InControl(target)) => {
                        push_unique(&mut ret.control_out, target);
                        push_unique(&mut ret.control_exits, *member);
                    }
                    (src, dst) => return Err(GraphError::UnsupportedEdge(src, dst)),
                }
                ret.crossing.push((src, dst));
            }
        }
        Ok(ret)
    }
}

/// Finds a path that leaves `set` and comes back into it.
fn find_reentry(arena: &GraphArena, members: &[NodeId], set: &HashSet<NodeId>) -> Result<Option<NodeId>, GraphError> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = Vec::new();
    for member in members {
        for succ in arena.node_ref(*member)?.out_all_nodes() {
            if !set.contains(&succ) && visited.insert(succ) {
                stack.push(succ);
            }
        }
    }
    while let Some(current) = stack.pop() {
        for succ in arena.node_ref(current)?.out_all_nodes() {
            if set.contains(&succ) {
                return Ok(Some(succ));
            }
            if visited.insert(succ) {
                stack.push(succ);
            }
        }
    }
    Ok(None)
}

fn session_graph_id(arena: &GraphArena, graph: GraphId) -> Result<Option<AttrValue>, GraphError> {
    if let Some(value) = arena.graph_ref(graph)?.attrs.get_attr(ATTR_NAME_SESSION_GRAPH_ID) {
        return Ok(Some(value.clone()));
    }
    let root = arena.root_graph(graph)?;
    Ok(arena.graph_ref(root)?.attrs.get_attr(ATTR_NAME_SESSION_GRAPH_ID).cloned())
}

/// Moves `nodes` out of `graph` into a new subgraph called `name` and leaves a
/// `PartitionedCall` node in their place. Returns the new subgraph.
pub fn build_subgraph_with_nodes(
    arena: &mut GraphArena,
    graph: GraphId,
    nodes: &[NodeId],
    name: &str,
) -> Result<GraphId, SubgraphTransformError> {
    build_subgraph_with_nodes_with_observer(arena, graph, nodes, name, &mut ())
}

pub fn build_subgraph_with_nodes_with_observer<T: GraphObserver>(
    arena: &mut GraphArena,
    graph: GraphId,
    nodes: &[NodeId],
    name: &str,
    observer: &mut T,
) -> Result<GraphId, SubgraphTransformError> {
    let direct = arena.get_direct_node(graph)?;
    if nodes.is_empty() {
        return Err(SubgraphTransformError::EmptyNodeSet(name.to_string()));
    }
    let Some(session) = session_graph_id(arena, graph)? else {
        return Err(SubgraphTransformError::MissingSessionGraphId(
            arena.graph_ref(graph)?.name().to_string(),
        ));
    };
    for node in nodes {
        arena.ensure_owned(graph, *node)?;
    }
    let set: HashSet<NodeId> = nodes.iter().copied().collect();
    let members: Vec<NodeId> = direct.iter().filter(|x| set.contains(x)).copied().collect();
    if let Some(node) = find_reentry(arena, &members, &set)? {
        return Err(SubgraphTransformError::NonConvexNodeSet {
            subgraph: name.to_string(),
            node: arena.node_ref(node)?.name().to_string(),
        });
    }
    if arena.get_subgraph(graph, name).is_some() {
        return Err(SubgraphTransformError::DuplicateSubgraphName(name.to_string()));
    }
    let boundary = Boundary::collect(arena, &members, &set)?;
    let position = direct.iter().position(|x| set.contains(x)).unwrap_or(direct.len());

    for (src, dst) in &boundary.crossing {
        arena.remove_edge(*src, *dst)?;
    }

    let sub = arena.create_graph(name);
    arena.graph_mut(sub)?.attrs.set_attr(ATTR_NAME_SESSION_GRAPH_ID, session);

    let call_op = OpDesc::with_ports(
        format!("{name}_{PARTITIONED_CALL_TYPE}"),
        PARTITIONED_CALL_TYPE,
        boundary.inputs.len(),
        boundary.outputs.len(),
    );
    let call = arena.add_node(graph, call_op)?;
    arena.move_node(call, graph, position)?;

    let mut data_nodes = Vec::with_capacity(boundary.inputs.len());
    for i in 0..boundary.inputs.len() {
        let mut op = OpDesc::with_ports(format!("{name}_{DATA_TYPE}_{i}"), DATA_TYPE, 1, 1);
        op.attrs.set_attr(ATTR_NAME_PARENT_NODE_INDEX, i);
        data_nodes.push(arena.add_node(sub, op)?);
    }
    for (k, member) in members.iter().enumerate() {
        arena.move_node(*member, sub, data_nodes.len() + k)?;
        observer.on_node_moved(*member, graph, sub);
    }
    let mut net_op = OpDesc::with_ports(format!("{name}_{NET_OUTPUT_TYPE}"), NET_OUTPUT_TYPE, boundary.outputs.len(), 0);
    for j in 0..boundary.outputs.len() {
        if let Some(desc) = net_op.input_desc_mut(j) {
            desc.attrs.set_attr(ATTR_NAME_PARENT_NODE_INDEX, j);
        }
    }
    let net_output = arena.add_node(sub, net_op)?;

    for (data, uses) in data_nodes.iter().zip(&boundary.input_uses) {
        for input in uses {
            arena.add_edge(data.output(0), *input)?;
        }
    }
    for (j, out) in boundary.outputs.iter().enumerate() {
        arena.add_edge(*out, net_output.input(j))?;
    }
    for exit in &boundary.control_exits {
        arena.ensure_control_edge(*exit, net_output)?;
    }

    for (i, producer) in boundary.inputs.iter().enumerate() {
        arena.add_edge(*producer, call.input(i))?;
    }
    for (j, uses) in boundary.output_uses.iter().enumerate() {
        for input in uses {
            arena.add_edge(call.output(j), *input)?;
        }
    }
    for src in &boundary.control_in {
        arena.ensure_control_edge(*src, call)?;
    }
    for dst in &boundary.control_out {
        arena.ensure_control_edge(call, *dst)?;
    }

    arena.attach_subgraph(call, sub)?;
    for member in &members {
        let hosted = arena.node_ref(*member)?.op_desc().subgraph_instance_names().to_vec();
        for hosted_name in hosted {
            if let Some(hosted_graph) = arena.get_subgraph(graph, &hosted_name) {
                arena.set_parent(hosted_graph, sub, *member)?;
            }
        }
    }

    log::info!(
        "Outlined {} nodes of {} into subgraph {} ({} inputs, {} outputs)",
        members.len(),
        arena.graph_ref(graph)?.name(),
        name,
        boundary.inputs.len(),
        boundary.outputs.len()
    );
    Ok(sub)
}

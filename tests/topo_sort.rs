use anyhow::Result;
use graph_ir_core::compute_graph::{GraphArena, GraphId, NodeId};
use graph_ir_core::observer::GraphObserver;
use graph_ir_core::topo_sort::{
    TopoSortConfig, TopoSortError, TopoSortingMode, topological_sorting, topological_sorting_with_observer,
};
use graph_ir_core::GraphBuilder;
use paste::paste;
use std::collections::HashMap;
use std::sync::Once;

static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).try_init().ok();
    });
}

fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn direct_names(arena: &GraphArena, graph: GraphId) -> Vec<String> {
    arena
        .get_direct_node(graph)
        .unwrap()
        .iter()
        .map(|x| arena.node_name(*x).unwrap().to_string())
        .collect()
}

/// Every predecessor must carry a smaller id than its successor, and ids are dense.
fn assert_valid_order(arena: &GraphArena, graph: GraphId) {
    let nodes = arena.get_direct_node(graph).unwrap();
    for (i, id) in nodes.iter().enumerate() {
        let node = arena.get_node(*id).unwrap();
        assert_eq!(node.topo_id(), Some(i), "{} is out of place", node.name());
        for pred in node.in_all_nodes() {
            let pred_id = arena.get_node(pred).unwrap().topo_id().unwrap();
            assert!(pred_id < i, "{} is ordered after its consumer {}", arena.node_name(pred).unwrap(), node.name());
        }
    }
    assert!(arena.get_graph(graph).unwrap().is_valid());
}

//          netoutput
//         |    \    \
//       node4 node5 node6
//       |      \
//     node2  node3
//      \    /
//      node1
fn build_normal_graph() -> Result<(GraphArena, GraphId)> {
    let mut builder = GraphBuilder::new("normal");
    let node1 = builder.add_node("node1", "node1", 0, 2);
    let node2 = builder.add_node("node2", "node2", 1, 1);
    let node3 = builder.add_node("node3", "node3", 1, 1);
    let node4 = builder.add_node("node4", "node4", 1, 1);
    let node5 = builder.add_node("node5", "node5", 1, 1);
    let node6 = builder.add_node("node6", "node6", 0, 1);
    let netoutput = builder.add_node("netoutput", "netoutput", 3, 1);
    builder
        .add_data_edge(node1, 0, node2, 0)
        .add_data_edge(node1, 1, node3, 0)
        .add_data_edge(node2, 0, node4, 0)
        .add_data_edge(node3, 0, node5, 0)
        .add_data_edge(node4, 0, netoutput, 0)
        .add_data_edge(node5, 0, netoutput, 1)
        .add_data_edge(node6, 0, netoutput, 2);
    builder
        .add_control_edge(node1, node2)
        .add_control_edge(node1, node3)
        .add_control_edge(node2, node4)
        .add_control_edge(node3, node5)
        .add_control_edge(node4, netoutput)
        .add_control_edge(node5, netoutput)
        .add_control_edge(node6, netoutput);
    Ok(builder.build()?)
}

const BFS_ORDER: [&str; 7] = ["node1", "node2", "node3", "node4", "node5", "node6", "netoutput"];
const DFS_ORDER: [&str; 7] = ["node1", "node3", "node5", "node2", "node4", "node6", "netoutput"];
const PRIORITY_DFS_ORDER: [&str; 7] = ["node6", "node1", "node2", "node3", "node4", "node5", "netoutput"];

macro_rules! normal_graph_order_test {
    ($name:ident, $options:expr, $expected:expr) => {
        paste! {
            #[test]
            fn [<test_normal_graph_ $name>]() -> Result<()> {
                init_logger();
                let (mut arena, graph) = build_normal_graph()?;
                // a first default sort, then the configured one on top of it
                topological_sorting(&mut arena, graph, &TopoSortConfig::default())?;
                let config = TopoSortConfig::from_options(&options(&$options));
                topological_sorting(&mut arena, graph, &config)?;
                assert_eq!(direct_names(&arena, graph), $expected);
                assert_valid_order(&arena, graph);
                Ok(())
            }
        }
    };
}

normal_graph_order_test!(default_options, [], BFS_ORDER);
normal_graph_order_test!(bfs, [("ge.topoSortingMode", "0")], BFS_ORDER);
normal_graph_order_test!(dfs, [("ge.topoSortingMode", "1")], DFS_ORDER);
normal_graph_order_test!(
    bfs_memory_priority,
    [("ge.topoSortingMode", "0"), ("ge.exec.memoryOptimizationPolicy", "MemoryPriority")],
    BFS_ORDER
);
normal_graph_order_test!(
    train_without_mode,
    [
        ("ge.graphRunMode", "1"),
        ("ge.topoSortingMode", ""),
        ("ge.exec.memoryOptimizationPolicy", "MemoryPriority")
    ],
    BFS_ORDER
);
normal_graph_order_test!(
    train_with_invalid_mode,
    [
        ("ge.graphRunMode", "1"),
        ("ge.topoSortingMode", "10"),
        ("ge.exec.memoryOptimizationPolicy", "MemoryPriority")
    ],
    BFS_ORDER
);
normal_graph_order_test!(
    dfs_memory_priority,
    [("ge.topoSortingMode", "1"), ("ge.exec.memoryOptimizationPolicy", "MemoryPriority")],
    PRIORITY_DFS_ORDER
);
normal_graph_order_test!(
    inference_without_mode,
    [
        ("ge.graphRunMode", "0"),
        ("ge.topoSortingMode", ""),
        ("ge.exec.memoryOptimizationPolicy", "MemoryPriority")
    ],
    PRIORITY_DFS_ORDER
);

#[test]
fn test_reverse_priority_dfs() -> Result<()> {
    init_logger();
    let (mut arena, graph) = build_normal_graph()?;
    let mut config = TopoSortConfig::from_options(&options(&[
        ("ge.topoSortingMode", "1"),
        ("ge.exec.memoryOptimizationPolicy", "MemoryPriority"),
    ]));
    config.reverse_dfs = true;
    topological_sorting(&mut arena, graph, &config)?;
    assert_eq!(
        direct_names(&arena, graph),
        ["node6", "node1", "node2", "node4", "node3", "node5", "netoutput"]
    );
    assert_valid_order(&arena, graph);
    Ok(())
}

#[test]
fn test_postorder_on_normal_graph_is_legal() -> Result<()> {
    init_logger();
    let (mut arena, graph) = build_normal_graph()?;
    topological_sorting(&mut arena, graph, &TopoSortConfig::with_mode(TopoSortingMode::DfsPostorder))?;
    assert_valid_order(&arena, graph);
    Ok(())
}

#[test]
fn test_unconnected_nodes_sort_in_declared_order() -> Result<()> {
    let mut builder = GraphBuilder::new("flat");
    let node1 = builder.add_node("node1", "node1", 0, 0);
    let node2 = builder.add_node("node2", "node2", 0, 0);
    let (mut arena, graph) = builder.build()?;
    topological_sorting(&mut arena, graph, &TopoSortConfig::default())?;
    assert_eq!(arena.get_node(node1).unwrap().topo_id(), Some(0));
    assert_eq!(arena.get_node(node2).unwrap().topo_id(), Some(1));
    Ok(())
}

#[test]
fn test_postorder_fan_out_graph() -> Result<()> {
    init_logger();
    let mut builder = GraphBuilder::new("postorder");
    let mut nodes: Vec<NodeId> = Vec::new();
    for i in 1..=4 {
        nodes.push(builder.add_node(&format!("node{i}"), "node", 0, 3));
    }
    for i in 5..=16 {
        nodes.push(builder.add_node(&format!("node{i}"), "node", 1, 1));
    }
    for i in 17..=19 {
        nodes.push(builder.add_node(&format!("node{i}"), "node", 4, 1));
    }
    nodes.push(builder.add_node("node20", "node", 3, 0));
    let n = |i: usize| nodes[i - 1];

    for source in 1..=4 {
        for output in 0..3 {
            // node1 feeds node5/node9/node13, node2 feeds node6/node10/node14, ...
            let middle = 4 + source + output * 4;
            builder.add_data_edge(n(source), output, n(middle), 0);
            builder.add_data_edge(n(middle), 0, n(17 + output), source - 1);
        }
    }
    for joint in 17..=19 {
        builder.add_control_edge(n(joint), n(20));
    }
    let (mut arena, graph) = builder.build()?;

    let config = TopoSortConfig::from_options(&options(&[("ge.topoSortingMode", "2")]));
    topological_sorting(&mut arena, graph, &config)?;
    let expected = [0, 2, 4, 6, 1, 3, 5, 7, 9, 10, 11, 12, 14, 15, 16, 17, 8, 13, 18, 19];
    for (i, id) in expected.iter().enumerate() {
        assert_eq!(arena.get_node(n(i + 1)).unwrap().topo_id(), Some(*id), "node{}", i + 1);
    }
    assert_valid_order(&arena, graph);
    Ok(())
}

#[test]
fn test_postorder_ring_fails() -> Result<()> {
    init_logger();
    let mut builder = GraphBuilder::new("ring");
    let node1 = builder.add_node("node1", "node1", 1, 1);
    let node2 = builder.add_node("node2", "node2", 1, 1);
    let node3 = builder.add_node("node3", "node3", 1, 1);
    builder
        .add_data_edge(node1, 0, node2, 0)
        .add_data_edge(node2, 0, node3, 0)
        .add_data_edge(node3, 0, node1, 0);
    let (mut arena, graph) = builder.build()?;
    let config = TopoSortConfig::from_options(&options(&[
        ("ge.topoSortingMode", "2"),
        ("ge.exec.memoryOptimizationPolicy", "MemoryPriority"),
    ]));
    let err = topological_sorting(&mut arena, graph, &config).unwrap_err();
    assert!(matches!(err, TopoSortError::Cycle { total: 3, .. }));
    Ok(())
}

#[test]
fn test_cycle_keeps_previous_numbering() -> Result<()> {
    init_logger();
    let (mut arena, graph) = build_normal_graph()?;
    topological_sorting(&mut arena, graph, &TopoSortConfig::default())?;
    let before: Vec<NodeId> = arena.get_direct_node(graph)?.to_vec();
    let ids: Vec<Option<usize>> = before.iter().map(|x| arena.get_node(*x).unwrap().topo_id()).collect();

    let node1 = arena.find_node(graph, "node1").unwrap();
    let netoutput = arena.find_node(graph, "netoutput").unwrap();
    arena.add_edge(netoutput.control_out(), node1.control_in())?;
    for mode in [TopoSortingMode::Bfs, TopoSortingMode::Dfs, TopoSortingMode::DfsPostorder] {
        let err = topological_sorting(&mut arena, graph, &TopoSortConfig::with_mode(mode)).unwrap_err();
        assert!(matches!(err, TopoSortError::Cycle { .. }), "{mode}");
        assert_eq!(arena.get_direct_node(graph)?, before.as_slice());
        let after: Vec<Option<usize>> = before.iter().map(|x| arena.get_node(*x).unwrap().topo_id()).collect();
        assert_eq!(after, ids);
    }
    Ok(())
}

//         variable      data
//          /     \        |
//       node1  node2 -> node3
//         |       |       |
//         |       |     node4
//          \      |      /
//                node5
fn build_delay_graph() -> Result<(GraphArena, GraphId)> {
    let mut builder = GraphBuilder::new("delay");
    let variable = builder.add_node("variable", "Variable", 0, 2);
    let node1 = builder.add_node("node1", "node1", 1, 1);
    let node2 = builder.add_node("node2", "node2", 1, 1);
    let node3 = builder.add_node("node3", "node3", 1, 1);
    let node4 = builder.add_node("node4", "node4", 1, 1);
    let node5 = builder.add_node("node5", "node5", 3, 0);
    let data = builder.add_node("data", "DATA", 0, 1);
    builder
        .add_data_edge(variable, 0, node1, 0)
        .add_data_edge(variable, 1, node2, 0)
        .add_data_edge(node1, 0, node5, 0)
        .add_data_edge(node2, 0, node5, 1)
        .add_data_edge(data, 0, node3, 0)
        .add_data_edge(node3, 0, node4, 0)
        .add_data_edge(node4, 0, node5, 2)
        .add_control_edge(node2, node3);
    Ok(builder.build()?)
}

fn build_delay_graph_multi_input(all_long_life: bool) -> Result<(GraphArena, GraphId)> {
    let mut builder = GraphBuilder::new("delay_multi_input");
    let constant = builder.add_node("const", "Const", 0, 1);
    let constant_op = builder.add_node("constant", if all_long_life { "Constant" } else { "test" }, 0, 1);
    let variable = builder.add_node("variable", "Variable", 0, 2);
    let node1 = builder.add_node("node1", "node1", 3, 1);
    let node2 = builder.add_node("node2", "node2", 1, 1);
    let node3 = builder.add_node("node3", "node3", 1, 1);
    let node4 = builder.add_node("node4", "node4", 1, 1);
    let node5 = builder.add_node("node5", "node5", 3, 0);
    let data = builder.add_node("data", "DATA", 0, 1);
    builder
        .add_data_edge(constant, 0, node1, 0)
        .add_data_edge(constant_op, 0, node1, 1)
        .add_data_edge(variable, 0, node1, 2)
        .add_data_edge(variable, 1, node2, 0)
        .add_data_edge(node1, 0, node5, 0)
        .add_data_edge(node2, 0, node5, 1)
        .add_data_edge(data, 0, node3, 0)
        .add_data_edge(node3, 0, node4, 0)
        .add_data_edge(node4, 0, node5, 2)
        .add_control_edge(node2, node3);
    Ok(builder.build()?)
}

fn postorder_config(memory_priority: bool) -> TopoSortConfig {
    let mut pairs = vec![("ge.topoSortingMode", "2")];
    if memory_priority {
        pairs.push(("ge.exec.memoryOptimizationPolicy", "MemoryPriority"));
    }
    TopoSortConfig::from_options(&options(&pairs))
}

#[test]
fn test_delay_stateful_producers() -> Result<()> {
    init_logger();
    let (mut arena, graph) = build_delay_graph()?;
    topological_sorting(&mut arena, graph, &postorder_config(true))?;
    assert_eq!(
        direct_names(&arena, graph),
        ["variable", "data", "node2", "node3", "node4", "node1", "node5"]
    );
    assert_valid_order(&arena, graph);
    Ok(())
}

#[test]
fn test_no_delay_without_memory_priority() -> Result<()> {
    init_logger();
    let (mut arena, graph) = build_delay_graph()?;
    topological_sorting(&mut arena, graph, &postorder_config(false))?;
    assert_eq!(
        direct_names(&arena, graph),
        ["variable", "node1", "node2", "data", "node3", "node4", "node5"]
    );
    Ok(())
}

#[test]
fn test_delay_multi_input() -> Result<()> {
    init_logger();
    let (mut arena, graph) = build_delay_graph_multi_input(true)?;
    topological_sorting(&mut arena, graph, &postorder_config(true))?;
    assert_eq!(
        direct_names(&arena, graph),
        ["const", "constant", "variable", "data", "node2", "node3", "node4", "node1", "node5"]
    );
    Ok(())
}

#[test]
fn test_short_lived_input_blocks_delay() -> Result<()> {
    init_logger();
    let (mut arena, graph) = build_delay_graph_multi_input(false)?;
    topological_sorting(&mut arena, graph, &postorder_config(true))?;
    assert_eq!(
        direct_names(&arena, graph),
        ["const", "constant", "variable", "node1", "data", "node2", "node3", "node4", "node5"]
    );
    Ok(())
}

#[test]
fn test_reorder_by_node_id() -> Result<()> {
    let (mut arena, graph) = build_delay_graph_multi_input(true)?;
    let nodes = arena.get_direct_node(graph)?.to_vec();
    let count = nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        arena.set_node_topo_id(*node, Some(count - i))?;
    }
    arena.reorder_by_node_id(graph)?;
    let reversed: Vec<NodeId> = nodes.into_iter().rev().collect();
    assert_eq!(arena.get_direct_node(graph)?, reversed.as_slice());
    Ok(())
}

//   netoutput
//       |
//      if  (sub1, sub2)
//     /   \
// data1   data2
fn build_graph_with_if() -> Result<(GraphArena, GraphId, [GraphId; 2])> {
    let mut builder = GraphBuilder::new("main");
    let data1 = builder.add_node("data1", "Data", 1, 1);
    let data2 = builder.add_node("data2", "Data", 1, 1);
    let if_node = builder.add_node("if", "If", 2, 1);
    let netoutput = builder.add_node("netoutput", "NetOutput", 1, 1);
    builder
        .add_data_edge(data1, 0, if_node, 0)
        .add_data_edge(data2, 0, if_node, 1)
        .add_data_edge(if_node, 0, netoutput, 0);
    let mut subs = Vec::new();
    for name in ["sub1", "sub2"] {
        let sub = builder.add_subgraph(if_node, name);
        // declared back to front so sorting has something to do
        let out = builder.add_node_to(sub, &format!("{name}_netoutput"), "NetOutput", 1, 1);
        let op = builder.add_node_to(sub, &format!("{name}sub"), "Sub", 2, 1);
        let d2 = builder.add_node_to(sub, &format!("{name}data2"), "Data", 1, 1);
        let d1 = builder.add_node_to(sub, &format!("{name}data1"), "Data", 1, 1);
        builder
            .set_node_attr(d1, "_parent_node_index", 0i64)
            .set_node_attr(d2, "_parent_node_index", 1i64)
            .set_input_attr(out, 0, "_parent_node_index", 0i64)
            .add_data_edge(d1, 0, op, 0)
            .add_data_edge(d2, 0, op, 1)
            .add_data_edge(op, 0, out, 0);
        subs.push(sub);
    }
    let (arena, graph) = builder.build()?;
    Ok((arena, graph, [subs[0], subs[1]]))
}

#[derive(Default)]
struct OrderRecorder {
    ordered: HashMap<GraphId, usize>,
}

impl GraphObserver for OrderRecorder {
    fn on_node_ordered(&mut self, graph: GraphId, _node: NodeId, _topo_id: usize) {
        *self.ordered.entry(graph).or_default() += 1;
    }
    fn on_node_moved(&mut self, _node: NodeId, _from: GraphId, _to: GraphId) {}
    fn on_node_removed(&mut self, _graph: GraphId, _node: NodeId, _name: &str) {}
}

#[test]
fn test_root_sort_orders_subgraphs() -> Result<()> {
    init_logger();
    let (mut arena, graph, subs) = build_graph_with_if()?;
    let mut recorder = OrderRecorder::default();
    topological_sorting_with_observer(&mut arena, graph, &TopoSortConfig::default(), &mut recorder)?;
    assert_valid_order(&arena, graph);
    for sub in subs {
        assert_valid_order(&arena, sub);
        assert_eq!(recorder.ordered[&sub], 4);
        let name = arena.graph_name(sub).unwrap().to_string();
        assert_eq!(direct_names(&arena, sub)[3], format!("{name}_netoutput"));
    }
    assert_eq!(recorder.ordered[&graph], 4);
    Ok(())
}

#[test]
fn test_subgraph_depth_limit() -> Result<()> {
    let (mut arena, graph, _) = build_graph_with_if()?;
    let mut config = TopoSortConfig::default();
    config.max_subgraph_depth = 0;
    assert!(topological_sorting(&mut arena, graph, &config).is_err());
    Ok(())
}

#[test]
fn test_event_nodes_follow_their_peers() -> Result<()> {
    init_logger();
    let mut builder = GraphBuilder::new("events");
    let a = builder.add_node("a", "A", 0, 1);
    let recv = builder.add_node("recv", "Recv", 0, 0);
    let b = builder.add_node("b", "B", 1, 1);
    let send = builder.add_node("send", "Send", 0, 0);
    let c = builder.add_node("c", "C", 1, 0);
    builder
        .add_data_edge(a, 0, b, 0)
        .add_data_edge(b, 0, c, 0)
        .add_control_edge(recv, c)
        .add_control_edge(a, send);
    let (mut arena, graph) = builder.build()?;
    let mut config = TopoSortConfig::default();
    config.reorder_event_nodes = true;
    topological_sorting(&mut arena, graph, &config)?;
    let names = direct_names(&arena, graph);
    let position = |name: &str| names.iter().position(|x| x == name).unwrap();
    assert_eq!(position("recv") + 1, position("c"));
    assert_eq!(position("a") + 1, position("send"));
    assert_valid_order(&arena, graph);
    Ok(())
}

#[test]
fn test_send_waits_for_every_predecessor() -> Result<()> {
    init_logger();
    let mut builder = GraphBuilder::new("events");
    let a = builder.add_node("a", "A", 0, 0);
    let send = builder.add_node("send", "Send", 0, 0);
    let c = builder.add_node("c", "C", 0, 0);
    builder
        .add_control_edge(a, send)
        .add_control_edge(c, send)
        .add_control_edge(a, c);
    let (mut arena, graph) = builder.build()?;
    let mut config = TopoSortConfig::default();
    config.reorder_event_nodes = true;
    topological_sorting(&mut arena, graph, &config)?;
    assert_eq!(direct_names(&arena, graph), ["a", "c", "send"]);
    assert_valid_order(&arena, graph);
    Ok(())
}

#[test]
fn test_recv_stays_ahead_of_every_successor() -> Result<()> {
    init_logger();
    let mut builder = GraphBuilder::new("events");
    let recv = builder.add_node("recv", "Recv", 0, 0);
    let c = builder.add_node("c", "C", 0, 0);
    let d = builder.add_node("d", "D", 0, 0);
    builder
        .add_control_edge(recv, c)
        .add_control_edge(recv, d)
        .add_control_edge(d, c);
    let (mut arena, graph) = builder.build()?;
    let mut config = TopoSortConfig::default();
    config.reorder_event_nodes = true;
    topological_sorting(&mut arena, graph, &config)?;
    assert_eq!(direct_names(&arena, graph), ["recv", "d", "c"]);
    assert_valid_order(&arena, graph);
    Ok(())
}

#[test]
fn test_config_from_json() -> Result<()> {
    let config: TopoSortConfig = serde_json::from_str(
        r#"{"mode": "DfsPostorder", "memory_priority": true, "delay_stateful_producers": true}"#,
    )?;
    assert_eq!(config.mode, Some(TopoSortingMode::DfsPostorder));
    assert_eq!(config.max_subgraph_depth, 10);
    assert!(!config.reverse_dfs);

    let (mut arena, graph) = build_delay_graph()?;
    topological_sorting(&mut arena, graph, &config)?;
    assert_eq!(
        direct_names(&arena, graph),
        ["variable", "data", "node2", "node3", "node4", "node1", "node5"]
    );
    Ok(())
}

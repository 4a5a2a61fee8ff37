use crate::compute_graph::{Anchor, GraphArena, GraphError, InDataAnchor, NodeId, NodeRole, OutDataAnchor};

impl GraphArena {
    /// Re-points an existing edge at a new source anchor.
    pub fn replace_edge_src(
        &mut self,
        old_src: impl Into<Anchor>,
        dst: impl Into<Anchor>,
        new_src: impl Into<Anchor>,
    ) -> Result<(), GraphError> {
        let (old_src, dst, new_src) = (old_src.into(), dst.into(), new_src.into());
        if !self.has_edge(old_src, dst) {
            return Err(GraphError::MissingEdge(old_src, dst));
        }
        self.remove_edge(old_src, dst)?;
        if let Err(err) = self.add_edge(new_src, dst) {
            self.add_edge(old_src, dst)?;
            return Err(err);
        }
        Ok(())
    }

    /// Re-points an existing edge at a new destination anchor.
    pub fn replace_edge_dst(
        &mut self,
        src: impl Into<Anchor>,
        old_dst: impl Into<Anchor>,
        new_dst: impl Into<Anchor>,
    ) -> Result<(), GraphError> {
        let (src, old_dst, new_dst) = (src.into(), old_dst.into(), new_dst.into());
        if !self.has_edge(src, old_dst) {
            return Err(GraphError::MissingEdge(src, old_dst));
        }
        self.remove_edge(src, old_dst)?;
        if let Err(err) = self.add_edge(src, new_dst) {
            self.add_edge(src, old_dst)?;
            return Err(err);
        }
        Ok(())
    }

    pub fn copy_in_ctrl_edges(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.node_ref(to)?;
        for src in self.node_ref(from)?.in_control_nodes() {
            self.ensure_control_edge(src, to)?;
        }
        Ok(())
    }

    pub fn move_in_ctrl_edges(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.copy_in_ctrl_edges(from, to)?;
        let anchors = self.node_ref(from)?.in_control.clone();
        for src in anchors {
            self.remove_edge(src, from.control_in())?;
        }
        Ok(())
    }

    pub fn copy_out_ctrl_edges(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.node_ref(to)?;
        for dst in self.node_ref(from)?.out_control.clone() {
            self.ensure_control_edge(to, dst)?;
        }
        Ok(())
    }

    pub fn move_out_ctrl_edges(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.copy_out_ctrl_edges(from, to)?;
        for dst in self.node_ref(from)?.out_control.clone() {
            self.remove_edge(from.control_out(), dst.control_in())?;
        }
        Ok(())
    }

    /// Splices `node` onto the existing edge `src -> dst`, entering at input
    /// `input` and leaving from output `output`.
    pub fn insert_node_between_data_anchors(
        &mut self,
        src: OutDataAnchor,
        dst: InDataAnchor,
        node: NodeId,
        input: usize,
        output: usize,
    ) -> Result<(), GraphError> {
        if !self.has_edge(src, dst) {
            return Err(GraphError::MissingEdge(src.into(), dst.into()));
        }
        let owner = self.node_ref(dst.node)?.owner;
        self.ensure_owned(owner, node)?;
        let inserted = self.node_ref(node)?;
        if input >= inserted.input_count() {
            return Err(GraphError::InvalidAnchor(node.input(input).into()));
        }
        if output >= inserted.output_count() {
            return Err(GraphError::InvalidAnchor(node.output(output).into()));
        }
        if inserted.peer_out_anchor(input).is_some() {
            return Err(GraphError::DuplicateEdge(src.into(), node.input(input).into()));
        }
        self.remove_edge(src, dst)?;
        self.add_edge(src, node.input(input))?;
        self.add_edge(node.output(output), dst)?;
        Ok(())
    }

    /// Inserts `node` in front of `dst`. The consumer's control predecessors follow the
    /// new node, except atomic-clean nodes which must stay attached to the consumer.
    pub fn insert_node_before(
        &mut self,
        dst: InDataAnchor,
        node: NodeId,
        input: usize,
        output: usize,
    ) -> Result<(), GraphError> {
        let src = self
            .node_ref(dst.node)?
            .peer_out_anchor(dst.index)
            .ok_or(GraphError::InvalidAnchor(dst.into()))?;
        self.insert_node_between_data_anchors(src, dst, node, input, output)?;
        let anchors = self.node_ref(dst.node)?.in_control.clone();
        for anchor in anchors {
            if self.node_ref(anchor.node())?.role() == NodeRole::AtomicAddrClean {
                continue;
            }
            self.remove_edge(anchor, dst.node.control_in())?;
            if anchor.node() != node && !self.has_edge(anchor, node.control_in()) {
                self.add_edge(anchor, node.control_in())?;
            }
        }
        Ok(())
    }

    /// Inserts `node` behind `src`, taking over every data consumer of `src`.
    /// Control edges of the producer stay where they are.
    pub fn insert_node_after(
        &mut self,
        src: OutDataAnchor,
        node: NodeId,
        input: usize,
        output: usize,
    ) -> Result<(), GraphError> {
        let consumers = self.node_ref(src.node)?.peer_in_anchors(src.index).to_vec();
        let owner = self.node_ref(src.node)?.owner;
        self.ensure_owned(owner, node)?;
        let inserted = self.node_ref(node)?;
        if input >= inserted.input_count() || inserted.peer_out_anchor(input).is_some() {
            return Err(GraphError::InvalidAnchor(node.input(input).into()));
        }
        if output >= inserted.output_count() {
            return Err(GraphError::InvalidAnchor(node.output(output).into()));
        }
        for dst in consumers {
            self.remove_edge(src, dst)?;
            self.add_edge(node.output(output), dst)?;
        }
        self.add_edge(src, node.input(input))
    }

    /// Detaches `node` from the graph. `io_map[o] = Some(i)` hands the producer of
    /// input `i` to every data consumer of output `o`. Control predecessors, and
    /// producers that are not forwarded, gain control edges to every downstream node
    /// so the ordering constraints survive. The node is left without any edge.
    pub fn isolate_node(&mut self, node: NodeId, io_map: &[Option<usize>]) -> Result<(), GraphError> {
        let n = self.node_ref(node)?;
        if io_map.len() != n.output_count() {
            return Err(GraphError::IoMapMismatch {
                node: n.name().to_string(),
                got: io_map.len(),
                expected: n.output_count(),
            });
        }
        if let Some(input) = io_map.iter().flatten().find(|x| **x >= n.input_count()) {
            return Err(GraphError::IoMapInvalidInput {
                node: n.name().to_string(),
                input: *input,
            });
        }

        let producers: Vec<Option<OutDataAnchor>> = n.in_data.clone();
        let control_sources = n.in_control_nodes();
        let downstream = n.out_all_nodes();
        let forwards: Vec<(OutDataAnchor, Vec<InDataAnchor>, Vec<NodeId>)> = io_map
            .iter()
            .enumerate()
            .filter_map(|(o, i)| {
                let producer = producers[(*i)?]?;
                Some((
                    producer,
                    n.peer_in_anchors(o).to_vec(),
                    n.peer_in_control_nodes(o).to_vec(),
                ))
            })
            .collect();
        let unforwarded: Vec<NodeId> = producers
            .iter()
            .enumerate()
            .filter(|(i, _)| !io_map.contains(&Some(*i)))
            .filter_map(|(_, p)| p.map(|x| x.node))
            .collect();

        self.unlink_all(node)?;
        for (producer, data_peers, control_peers) in forwards {
            for dst in data_peers {
                self.add_edge(producer, dst)?;
            }
            for dst in control_peers {
                self.ensure_control_edge(producer.node, dst)?;
            }
        }
        for src in control_sources.into_iter().chain(unforwarded) {
            for dst in &downstream {
                if src != node && *dst != node {
                    self.ensure_control_edge(src, *dst)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compute_graph::builder::GraphBuilder;
    use crate::compute_graph::{GraphError, OpDesc};

    #[test]
    fn test_insert_node_between_data_anchors() {
        let mut builder = GraphBuilder::new("g");
        let a = builder.add_node("a", "A", 0, 1);
        let b = builder.add_node("b", "B", 1, 0);
        builder.add_data_edge(a, 0, b, 0);
        let (mut arena, graph) = builder.build().unwrap();
        let cast = arena.add_node(graph, OpDesc::with_ports("cast", "Cast", 1, 1)).unwrap();
        arena.insert_node_between_data_anchors(a.output(0), b.input(0), cast, 0, 0).unwrap();
        assert!(arena.has_edge(a.output(0), cast.input(0)));
        assert!(arena.has_edge(cast.output(0), b.input(0)));
        assert!(!arena.has_edge(a.output(0), b.input(0)));
    }

    #[test]
    fn test_insert_node_before_keeps_atomic_clean_control() {
        let mut builder = GraphBuilder::new("g");
        let a = builder.add_node("a", "A", 0, 1);
        let clean = builder.add_node("clean", "AtomicAddrClean", 0, 0);
        let ctrl = builder.add_node("ctrl", "NoOp", 0, 0);
        let b = builder.add_node("b", "B", 1, 0);
        builder.add_data_edge(a, 0, b, 0);
        builder.add_control_edge(clean, b);
        builder.add_control_edge(ctrl, b);
        let (mut arena, graph) = builder.build().unwrap();
        let cast = arena.add_node(graph, OpDesc::with_ports("cast", "Cast", 1, 1)).unwrap();

        arena.insert_node_before(b.input(0), cast, 0, 0).unwrap();
        assert!(arena.has_edge(cast.output(0), b.input(0)));
        assert_eq!(arena.get_node(b).unwrap().in_control_nodes(), vec![clean]);
        assert_eq!(arena.get_node(cast).unwrap().in_control_nodes(), vec![ctrl]);
    }

    #[test]
    fn test_insert_node_after_takes_all_consumers() {
        let mut builder = GraphBuilder::new("g");
        let a = builder.add_node("a", "A", 0, 1);
        let b = builder.add_node("b", "B", 1, 0);
        let c = builder.add_node("c", "C", 1, 0);
        builder.add_data_edge(a, 0, b, 0);
        builder.add_data_edge(a, 0, c, 0);
        builder.add_control_edge(a, c);
        let (mut arena, graph) = builder.build().unwrap();
        let id = arena.add_node(graph, OpDesc::with_ports("identity", "Identity", 1, 1)).unwrap();
        arena.insert_node_after(a.output(0), id, 0, 0).unwrap();
        assert_eq!(arena.get_node(a).unwrap().out_data_nodes(), vec![id]);
        assert_eq!(arena.get_node(id).unwrap().out_data_nodes(), vec![b, c]);
        assert_eq!(arena.get_node(a).unwrap().out_control_nodes(), vec![c]);
    }

    #[test]
    fn test_replace_edge_requires_existing_edge() {
        let mut builder = GraphBuilder::new("g");
        let a = builder.add_node("a", "A", 0, 1);
        let b = builder.add_node("b", "B", 0, 1);
        let c = builder.add_node("c", "C", 1, 0);
        builder.add_data_edge(a, 0, c, 0);
        let (mut arena, _) = builder.build().unwrap();
        assert!(matches!(
            arena.replace_edge_src(b.output(0), c.input(0), a.output(0)),
            Err(GraphError::MissingEdge(..))
        ));
        arena.replace_edge_src(a.output(0), c.input(0), b.output(0)).unwrap();
        assert_eq!(arena.get_node(c).unwrap().peer_out_anchor(0), Some(b.output(0)));
    }

    #[test]
    fn test_move_ctrl_edges_skip_self_loops() {
        let mut builder = GraphBuilder::new("g");
        let a = builder.add_node("a", "A", 0, 0);
        let b = builder.add_node("b", "B", 0, 0);
        let c = builder.add_node("c", "C", 0, 0);
        builder.add_control_edge(a, b);
        builder.add_control_edge(b, c);
        let (mut arena, _) = builder.build().unwrap();
        arena.move_in_ctrl_edges(b, a).unwrap();
        assert!(arena.get_node(a).unwrap().in_control_nodes().is_empty());
        assert!(arena.get_node(b).unwrap().in_control_nodes().is_empty());
        arena.move_out_ctrl_edges(b, a).unwrap();
        assert_eq!(arena.get_node(a).unwrap().out_control_nodes(), vec![c]);
        assert!(arena.get_node(b).unwrap().out_control_nodes().is_empty());
    }

    #[test]
    fn test_isolate_node() {
        let mut builder = GraphBuilder::new("g");
        let a = builder.add_node("a", "A", 0, 1);
        let w = builder.add_node("w", "W", 0, 1);
        let ctrl = builder.add_node("ctrl", "NoOp", 0, 0);
        let mid = builder.add_node("mid", "Mid", 2, 1);
        let b = builder.add_node("b", "B", 1, 0);
        builder.add_data_edge(a, 0, mid, 0);
        builder.add_data_edge(w, 0, mid, 1);
        builder.add_data_edge(mid, 0, b, 0);
        builder.add_control_edge(ctrl, mid);
        let (mut arena, _) = builder.build().unwrap();

        assert!(matches!(arena.isolate_node(mid, &[]), Err(GraphError::IoMapMismatch { .. })));
        assert!(matches!(
            arena.isolate_node(mid, &[Some(5)]),
            Err(GraphError::IoMapInvalidInput { .. })
        ));
        assert!(arena.has_edge(mid.output(0), b.input(0)));

        arena.isolate_node(mid, &[Some(0)]).unwrap();
        let isolated = arena.get_node(mid).unwrap();
        assert_eq!(isolated.in_edge_count(), 0);
        assert_eq!(isolated.out_edge_count(), 0);
        assert_eq!(arena.get_node(b).unwrap().peer_out_anchor(0), Some(a.output(0)));
        let mut preds = arena.get_node(b).unwrap().in_control_nodes();
        preds.sort();
        let mut expected = vec![ctrl, w];
        expected.sort();
        assert_eq!(preds, expected);
    }
}

use crate::compute_graph::{GraphArena, GraphError, GraphId, Node, NodeId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    OnPath,
    Deferred,
    Done,
}

struct Frame {
    node: NodeId,
    // (predecessor, reached through a data edge)
    preds: Vec<(NodeId, bool)>,
    next: usize,
    delayed: bool,
    deferred: Vec<NodeId>,
}

pub(crate) enum PostorderOutcome {
    Sorted(Vec<NodeId>),
    Cycle { sorted: usize },
}

struct PostorderSorter<'a> {
    arena: &'a GraphArena,
    delay_stateful_producers: bool,
    state: HashMap<NodeId, VisitState>,
    pending: HashMap<NodeId, Vec<NodeId>>,
    order: Vec<NodeId>,
}

impl<'a> PostorderSorter<'a> {
    fn frame(&self, node: NodeId, delayed: bool) -> Result<Frame, GraphError> {
        let n = self.arena.node_ref(node)?;
        let mut preds: Vec<(NodeId, bool)> = n.in_data_nodes().into_iter().map(|x| (x, true)).collect();
        preds.extend(n.in_control_nodes().into_iter().map(|x| (x, false)));
        Ok(Frame {
            node,
            preds,
            next: 0,
            delayed,
            deferred: Vec::new(),
        })
    }

    /// Producers that only read long-lived values may wait until a consumer needs them.
    fn is_delayable(&self, node: &Node) -> Result<bool, GraphError> {
        if !self.delay_stateful_producers {
            return Ok(false);
        }
        let producers = node.in_data_nodes();
        if producers.is_empty() {
            return Ok(false);
        }
        for producer in producers {
            if !self.arena.node_ref(producer)?.role().is_long_life() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn emit(&mut self, node: NodeId) {
        self.state.insert(node, VisitState::Done);
        self.order.push(node);
    }

    fn emit_deferred(&mut self, node: NodeId) {
        let mut work = vec![(node, false)];
        while let Some((current, expanded)) = work.pop() {
            if self.state.get(&current) != Some(&VisitState::Deferred) {
                continue;
            }
            if expanded {
                self.emit(current);
                continue;
            }
            work.push((current, true));
            if let Some(pending) = self.pending.remove(&current) {
                work.extend(pending.into_iter().rev().map(|x| (x, false)));
            }
        }
    }

    /// Returns false when a cycle was found.
    fn visit(&mut self, sink: NodeId) -> Result<bool, GraphError> {
        self.state.insert(sink, VisitState::OnPath);
        let mut stack = vec![self.frame(sink, false)?];
        while let Some(frame) = stack.last_mut() {
            if frame.next < frame.preds.len() {
                let (pred, through_data) = frame.preds[frame.next];
                frame.next += 1;
                match self.state.get(&pred).copied() {
                    Some(VisitState::OnPath) => return Ok(false),
                    Some(VisitState::Done) => {}
                    Some(VisitState::Deferred) => {
                        if through_data {
                            frame.deferred.push(pred);
                        } else {
                            self.emit_deferred(pred);
                        }
                    }
                    None => {
                        let delayed = through_data && self.is_delayable(self.arena.node_ref(pred)?)?;
                        self.state.insert(pred, VisitState::OnPath);
                        let next = self.frame(pred, delayed)?;
                        stack.push(next);
                    }
                }
                continue;
            }
            let Some(frame) = stack.pop() else {
                break;
            };
            match stack.last_mut() {
                Some(parent) if frame.delayed => {
                    self.state.insert(frame.node, VisitState::Deferred);
                    self.pending.insert(frame.node, frame.deferred);
                    parent.deferred.push(frame.node);
                }
                _ => {
                    for deferred in frame.deferred {
                        self.emit_deferred(deferred);
                    }
                    self.emit(frame.node);
                }
            }
        }
        Ok(true)
    }
}

/// Depth-first postorder from every sink: each node is emitted right after everything it
/// depends on. With `delay_stateful_producers`, nodes fed only by variables and constants
/// are emitted just before the consumer that first asked for them.
pub(crate) fn sort(
    arena: &GraphArena,
    graph: GraphId,
    delay_stateful_producers: bool,
) -> Result<PostorderOutcome, GraphError> {
    let nodes = arena.get_direct_node(graph)?;
    let mut sorter = PostorderSorter {
        arena,
        delay_stateful_producers,
        state: HashMap::with_capacity(nodes.len()),
        pending: HashMap::new(),
        order: Vec::with_capacity(nodes.len()),
    };
    for node in nodes {
        if !arena.node_ref(*node)?.out_all_nodes().is_empty() || sorter.state.contains_key(node) {
            continue;
        }
        if !sorter.visit(*node)? {
            return Ok(PostorderOutcome::Cycle {
                sorted: sorter.order.len(),
            });
        }
    }
    if sorter.order.len() != nodes.len() {
        return Ok(PostorderOutcome::Cycle {
            sorted: sorter.order.len(),
        });
    }
    Ok(PostorderOutcome::Sorted(sorter.order))
}

use crate::compute_graph::{AttrValue, GraphArena, GraphError, GraphId, NodeId, OpDesc};

enum PendingLink {
    Data {
        src: NodeId,
        output: usize,
        dst: NodeId,
        input: usize,
    },
    Control {
        src: NodeId,
        dst: NodeId,
    },
    Subgraph {
        host: NodeId,
        graph: GraphId,
    },
}

/// Declarative fixture builder. Nodes are allocated immediately so their handles can be
/// used while wiring; edges and subgraph attachments are applied by `build`.
pub struct GraphBuilder {
    arena: GraphArena,
    graph: GraphId,
    links: Vec<PendingLink>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut arena = GraphArena::new();
        let graph = arena.create_graph(name);
        Self {
            arena,
            graph,
            links: Vec::new(),
        }
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn add_node(&mut self, name: &str, op_type: &str, inputs: usize, outputs: usize) -> NodeId {
        self.add_node_to(self.graph, name, op_type, inputs, outputs)
    }

    /// Adds a node to a graph previously created through this builder.
    pub fn add_node_to(
        &mut self,
        graph: GraphId,
        name: &str,
        op_type: &str,
        inputs: usize,
        outputs: usize,
    ) -> NodeId {
        self.arena
            .insert_node(graph, OpDesc::with_ports(name, op_type, inputs, outputs), false)
    }

    /// Creates an empty graph named `name` that `host` will carry as a subgraph.
    pub fn add_subgraph(&mut self, host: NodeId, name: &str) -> GraphId {
        let graph = self.arena.create_graph(name);
        self.links.push(PendingLink::Subgraph { host, graph });
        graph
    }

    pub fn add_data_edge(&mut self, src: NodeId, output: usize, dst: NodeId, input: usize) -> &mut Self {
        self.links.push(PendingLink::Data {
            src,
            output,
            dst,
            input,
        });
        self
    }

    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) -> &mut Self {
        self.links.push(PendingLink::Control { src, dst });
        self
    }

    pub fn set_node_attr(&mut self, node: NodeId, name: &str, value: impl Into<AttrValue>) -> &mut Self {
        if let Some(attrs) = self.arena.node_attrs_mut(node) {
            attrs.set_attr(name, value);
        }
        self
    }

    pub fn set_input_attr(
        &mut self,
        node: NodeId,
        index: usize,
        name: &str,
        value: impl Into<AttrValue>,
    ) -> &mut Self {
        if let Some(desc) = self.arena.input_desc_mut(node, index) {
            desc.attrs.set_attr(name, value);
        }
        self
    }

    pub fn set_output_attr(
        &mut self,
        node: NodeId,
        index: usize,
        name: &str,
        value: impl Into<AttrValue>,
    ) -> &mut Self {
        if let Some(desc) = self.arena.output_desc_mut(node, index) {
            desc.attrs.set_attr(name, value);
        }
        self
    }

    pub fn set_graph_attr(&mut self, graph: GraphId, name: &str, value: impl Into<AttrValue>) -> &mut Self {
        if let Some(g) = self.arena.get_graph_mut(graph) {
            g.attrs.set_attr(name, value);
        }
        self
    }

    pub fn set_graph_unknown_flag(&mut self, graph: GraphId, unknown: bool) -> &mut Self {
        if let Some(g) = self.arena.get_graph_mut(graph) {
            g.set_graph_unknown_flag(unknown);
        }
        self
    }

    pub fn build(self) -> Result<(GraphArena, GraphId), GraphError> {
        let mut arena = self.arena;
        for link in self.links {
            match link {
                PendingLink::Data {
                    src,
                    output,
                    dst,
                    input,
                } => arena.add_edge(src.output(output), dst.input(input))?,
                PendingLink::Control { src, dst } => {
                    arena.add_edge(src.control_out(), dst.control_in())?
                }
                PendingLink::Subgraph { host, graph } => arena.attach_subgraph(host, graph)?,
            }
        }
        Ok((arena, self.graph))
    }
}

#![cfg(feature = "dot")]

use crate::{
    common::*,
    graph::{Graph, Node, NodeKey, Producer},
};
use dot::{Arrow, Edges, GraphWalk, Id, LabelText, Labeller, Nodes, Style};

/// A vertex of the rendered graph: the model input or a compiled node.
pub type Vertex = Producer;

type Edge = (Vertex, NodeKey, usize);

impl Graph {
    pub fn render_dot(&self, writer: &mut impl Write) -> Result<()> {
        dot::render(self, writer)?;
        Ok(())
    }

    fn tap_name(&self, key: NodeKey) -> Option<&str> {
        self.output_taps
            .iter()
            .find(|(_, &tap_key)| tap_key == key)
            .map(|(name, _)| name.as_str())
    }
}

fn ident(name: String) -> Id<'static> {
    // only alphanumerics and underscores are emitted
    Id::new(name).unwrap_or_else(|()| unreachable!())
}

impl<'a> GraphWalk<'a, Vertex, Edge> for Graph {
    fn nodes(&'a self) -> Nodes<'a, Vertex> {
        let vertices: Vec<_> = iter::once(Producer::Input)
            .chain(self.nodes.keys().map(|&key| Producer::Node(key)))
            .collect();
        vertices.into()
    }

    fn edges(&'a self) -> Edges<'a, Edge> {
        let edges: Vec<_> = self
            .nodes
            .values()
            .flat_map(|node| {
                node.producers
                    .iter()
                    .enumerate()
                    .map(move |(slot, &src)| (src, node.key, slot))
            })
            .collect();
        edges.into()
    }

    fn source(&'a self, edge: &Edge) -> Vertex {
        let (src, _dst, _slot) = *edge;
        src
    }

    fn target(&'a self, edge: &Edge) -> Vertex {
        let (_src, dst, _slot) = *edge;
        Producer::Node(dst)
    }
}

impl<'a> Labeller<'a, Vertex, Edge> for Graph {
    fn graph_id(&'a self) -> Id<'a> {
        ident("model".into())
    }

    fn node_id(&'a self, vertex: &Vertex) -> Id<'a> {
        match vertex {
            Producer::Input => ident("input".into()),
            Producer::Node(key) => ident(format!("node_{}", key)),
        }
    }

    fn node_shape(&'a self, vertex: &Vertex) -> Option<LabelText<'a>> {
        let key = match vertex {
            Producer::Input => return Some(LabelText::label("box")),
            Producer::Node(key) => key,
        };
        match self.nodes[key].kind {
            ModuleKind::Detect => Some(LabelText::label("box")),
            ModuleKind::Concat => Some(LabelText::label("invhouse")),
            _ => None,
        }
    }

    fn node_label(&'a self, vertex: &Vertex) -> LabelText<'a> {
        let key = match vertex {
            Producer::Input => {
                return LabelText::escaped(format!(
                    r"input\n{}",
                    dot::escape_html(&self.input_shape.to_string())
                ))
            }
            Producer::Node(key) => *key,
        };

        let Node {
            kind,
            repeat,
            channels,
            ref args,
            ref output_shape,
            stride,
            ..
        } = self.nodes[&key];

        let tap = self
            .tap_name(key)
            .map(|name| format!(r"\ntap={}", name))
            .unwrap_or_default();
        let stride = stride
            .map(|stride| format!(r"\nstride={}", stride))
            .unwrap_or_default();

        LabelText::escaped(format!(
            r"({}) {} {}\n{}\nc={} args=[{}]{}{}",
            key,
            kind,
            repeat,
            dot::escape_html(&output_shape.to_string()),
            channels,
            dot::escape_html(&args.iter().join(", ")),
            stride,
            tap,
        ))
    }

    fn node_style(&'a self, _vertex: &Vertex) -> Style {
        Style::None
    }

    fn node_color(&'a self, vertex: &Vertex) -> Option<LabelText<'a>> {
        let key = match vertex {
            Producer::Input => return Some(LabelText::label("black")),
            Producer::Node(key) => *key,
        };
        if self.tap_name(key).is_some() {
            return Some(LabelText::label("red"));
        }
        match self.nodes[&key].kind {
            ModuleKind::Detect => Some(LabelText::label("orange")),
            ModuleKind::Concat => Some(LabelText::label("brown")),
            ModuleKind::Upsample | ModuleKind::ConvTranspose => Some(LabelText::label("green")),
            _ => Some(LabelText::label("blue")),
        }
    }

    fn edge_label(&'a self, edge: &Edge) -> LabelText<'a> {
        let (src, dst, slot) = *edge;
        let shape = match src {
            Producer::Input => &self.input_shape,
            Producer::Node(key) => &self.nodes[&key].output_shape,
        };
        let slot = if self.nodes[&dst].is_fan_in() {
            format!(" #{}", slot)
        } else {
            String::new()
        };

        LabelText::escaped(format!(
            r"{} -> {}{}\n{}",
            src,
            dst,
            slot,
            dot::escape_html(&shape.to_string())
        ))
    }

    fn edge_start_arrow(&'a self, _edge: &Edge) -> Arrow {
        Arrow::none()
    }

    fn edge_end_arrow(&'a self, _edge: &Edge) -> Arrow {
        Arrow::normal()
    }

    fn edge_style(&'a self, _edge: &Edge) -> Style {
        Style::None
    }

    fn edge_color(&'a self, _edge: &Edge) -> Option<LabelText<'a>> {
        None
    }

    fn kind(&self) -> dot::Kind {
        dot::Kind::Digraph
    }
}

//! Compiles declarative model specifications into executable graphs.

mod builder;
mod common;
mod graph;
mod graphviz;

pub use builder::CompileOptions;
pub use graph::{Graph, GraphSummary, Node, NodeKey, Producer, Repeat, TapName};

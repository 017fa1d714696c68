//! Declarative detector model specifications.
//!
//! A model file lists backbone and head layers as `[from, repeats, module, args]`
//! records together with a table of scale multipliers. This crate parses such
//! files, looks modules up in the registry and selects the scale parameters. The
//! resulting [LayerSpec] list is compiled into a graph by the `model-graph` crate.

mod common;
pub mod arg;
pub mod error;
pub mod layer;
pub mod module;
pub mod parser;
pub mod registry;
pub mod scale;
pub mod shape_rule;
pub mod source_ref;
pub mod spec;

pub use arg::*;
pub use error::*;
pub use layer::*;
pub use module::*;
pub use parser::*;
pub use scale::*;
pub use shape_rule::*;
pub use source_ref::*;
pub use spec::*;

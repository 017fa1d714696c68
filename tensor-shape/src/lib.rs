//! Tensor shapes whose dimensions may be left for inference.

mod common;
pub mod dim;
pub mod shape;

pub use dim::*;
pub use shape::*;

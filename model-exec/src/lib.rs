//! Forward evaluation of compiled model graphs.
//!
//! The numeric kernels are supplied by a [Backend]. The executor walks the
//! graph in node order, feeds each module the cached outputs of its producers
//! and drops cached outputs as soon as their last consumer has run.

mod backend;
mod common;
mod error;
mod executor;
mod plan;

pub use backend::*;
pub use error::*;
pub use executor::*;
pub use plan::*;

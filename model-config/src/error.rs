use crate::{module::Arity, module::ModuleKind, source_ref::SourceRef};

/// Errors raised while parsing a model specification or compiling it into a graph.
///
/// Every layer-level variant carries the declared index of the offending layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("malformed spec{}: {reason}", at_layer(.index))]
    MalformedSpec {
        index: Option<usize>,
        reason: String,
    },
    #[error("unknown module '{name}'{}", at_layer(.index))]
    UnknownModule { index: Option<usize>, name: String },
    #[error("unknown scale '{key}', available scales are [{}]", .available.join(", "))]
    UnknownScale { key: String, available: Vec<String> },
    #[error("module {kind} at layer {index} expects {expected} inputs, but {found} producers are given")]
    ArityMismatch {
        index: usize,
        kind: ModuleKind,
        expected: Arity,
        found: usize,
    },
    #[error("cannot resolve source {source_ref} at layer {index}: {reason}")]
    ReferenceResolution {
        index: usize,
        source_ref: SourceRef,
        reason: String,
    },
    #[error("shape mismatch at layer {index}: {reason}")]
    ShapeMismatch { index: usize, reason: String },
}

impl Error {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedSpec {
            index: None,
            reason: reason.into(),
        }
    }

    pub fn malformed_at(index: usize, reason: impl Into<String>) -> Self {
        Self::MalformedSpec {
            index: Some(index),
            reason: reason.into(),
        }
    }

    /// The declared index of the layer the error refers to, if any.
    pub fn layer_index(&self) -> Option<usize> {
        match *self {
            Self::MalformedSpec { index, .. } | Self::UnknownModule { index, .. } => index,
            Self::ArityMismatch { index, .. }
            | Self::ReferenceResolution { index, .. }
            | Self::ShapeMismatch { index, .. } => Some(index),
            Self::UnknownScale { .. } => None,
        }
    }

    /// Attaches a layer index to errors raised without layer context.
    pub fn at(self, layer: usize) -> Self {
        match self {
            Self::MalformedSpec {
                index: None,
                reason,
            } => Self::MalformedSpec {
                index: Some(layer),
                reason,
            },
            Self::UnknownModule { index: None, name } => Self::UnknownModule {
                index: Some(layer),
                name,
            },
            err => err,
        }
    }
}

fn at_layer(index: &Option<usize>) -> String {
    match index {
        Some(index) => format!(" at layer {}", index),
        None => String::new(),
    }
}

use crate::common::*;

/// Errors aborting a single run. The graph stays valid.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to evaluate {kind} at node {key}")]
    NodeEvaluation {
        key: NodeKey,
        kind: ModuleKind,
        #[source]
        source: anyhow::Error,
    },
    #[error("execution was cancelled before node {key}")]
    Cancelled { key: NodeKey },
    #[error("node {key} is not in the graph")]
    UnknownNode { key: NodeKey },
    #[error("the graph has no detection head")]
    NoHead,
}

impl Error {
    /// The node the error refers to, if any.
    pub fn key(&self) -> Option<NodeKey> {
        match *self {
            Self::NodeEvaluation { key, .. }
            | Self::Cancelled { key }
            | Self::UnknownNode { key } => Some(key),
            Self::NoHead => None,
        }
    }
}

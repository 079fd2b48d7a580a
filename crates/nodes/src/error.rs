//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` — the node is re-run with exponential back-off.
/// - `Fatal`     — the execution stops and records the error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the engine should re-try the node.
    #[error("{0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("{0}")]
    Fatal(String),

    /// A required parameter is missing or has the wrong shape.
    #[error("node is missing a required parameter: {0}")]
    MissingParameter(String),
}

impl NodeError {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

//! Batch-run error type.

use std::path::PathBuf;

use thiserror::Error;

use engine::StoreError;
use runner::SupervisorError;

#[derive(Debug, Error)]
pub enum BatchError {
    /// `--ids` contained something other than comma-separated numbers.
    #[error("invalid workflow id list: {0}")]
    InvalidIds(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: invalid json: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A node's notes carry a test annotation that cannot be parsed.
    #[error("node '{node}' has an invalid test annotation: {reason}")]
    InvalidAnnotation { node: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl BatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

//! Errors surfaced by the webhook lifecycles.

use thiserror::Error;

use engine::StoreError;
use nodes::HttpMethod;
use runner::SupervisorError;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// No registration matches the request.
    #[error("the requested webhook \"{method} {path}\" is not registered")]
    NotRegistered { method: HttpMethod, path: String },

    /// Another registration already owns the key.
    #[error("webhook \"{method} {path}\" is already registered")]
    Conflict { method: HttpMethod, path: String },

    #[error("invalid webhook \"{path}\": {reason}")]
    InvalidPath { path: String, reason: String },

    /// A workflow could not be activated; recorded per workflow.
    #[error("workflow '{workflow_id}' could not be activated: {reason}")]
    ActivationFailed { workflow_id: String, reason: String },

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    /// An HTTP-shaped failure produced while handling a request.
    #[error("{message}")]
    Response { status: u16, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl WebhookError {
    /// HTTP status the error maps to.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotRegistered { .. } | Self::WorkflowNotFound(_) => 404,
            Self::Conflict { .. } => 409,
            Self::InvalidPath { .. } => 400,
            Self::Response { status, .. } => *status,
            Self::ActivationFailed { .. } | Self::Store(_) | Self::Supervisor(_) => 500,
        }
    }
}

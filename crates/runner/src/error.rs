//! Error types for the supervisor/worker runtime.

use thiserror::Error;

use engine::StoreError;

/// The peer broke the message contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),

    #[error("unexpected '{0}' message")]
    Unexpected(&'static str),

    /// The worker's side of the channel closed before `end`, `timeout` or
    /// `processError` arrived.
    #[error("worker exited without sending a terminal message")]
    ClosedWithoutTerminal,

    #[error("channel closed")]
    ChannelClosed,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to launch worker: {0}")]
    Launch(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("execution '{0}' is not running")]
    NotRunning(String),

    /// The execution's driver went away without publishing a result.
    #[error("result for execution '{0}' was dropped")]
    ResultDropped(String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

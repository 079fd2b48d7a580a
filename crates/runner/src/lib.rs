//! `runner` crate — the supervisor/worker execution protocol.
//!
//! * [`protocol`] — the closed set of messages in both directions.
//! * [`channel`] — duplex channels (in-process pair, JSON lines over stdio).
//! * [`launcher`] — starting a worker as a child process or a tokio task.
//! * [`worker`] — runs one execution and speaks the worker half.
//! * [`supervisor`] — allocates ids, drives workers, enforces deadlines and
//!   persists results.

pub mod active;
pub mod channel;
pub mod error;
pub mod launcher;
pub mod protocol;
pub mod supervisor;
pub mod worker;

pub use active::ActiveExecutions;
pub use error::{ProtocolViolation, SupervisorError, WorkerError};
pub use launcher::{InProcessLauncher, ProcessLauncher, WorkerConnection, WorkerHandle, WorkerLauncher};
pub use protocol::{SupervisorMessage, WorkerMessage};
pub use supervisor::{
    ExecutionHandle, StartRequest, Stores, Supervisor, SupervisorConfig, UiSink,
};
pub use worker::{run_stdio, Worker};

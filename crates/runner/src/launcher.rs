//! Starting workers.
//!
//! A [`WorkerLauncher`] hands the supervisor a connected channel plus a
//! handle it can use to kill the worker. [`ProcessLauncher`] spawns a child
//! process speaking JSON lines on stdin/stdout; [`InProcessLauncher`] runs
//! the worker as a tokio task.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{self, SupervisorSide};
use crate::worker::Worker;
use crate::SupervisorError;

/// Something that can be killed once the supervisor gives up on it.
pub enum WorkerHandle {
    Process(Child),
    Task(JoinHandle<()>),
}

impl WorkerHandle {
    pub async fn kill(&mut self) {
        match self {
            Self::Process(child) => {
                if let Err(e) = child.kill().await {
                    warn!("failed to kill worker process: {e}");
                }
            }
            Self::Task(task) => task.abort(),
        }
    }

    /// Reap the worker after it has sent its terminal message.
    pub async fn reap(self) {
        match self {
            Self::Process(mut child) => match child.wait().await {
                Ok(status) => debug!("worker process exited with {status}"),
                Err(e) => warn!("failed to wait for worker process: {e}"),
            },
            Self::Task(task) => {
                let _ = task.await;
            }
        }
    }
}

pub struct WorkerConnection {
    pub channel: SupervisorSide,
    pub handle: WorkerHandle,
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self) -> Result<WorkerConnection, SupervisorError>;
}

// ---------------------------------------------------------------------------
// Child process
// ---------------------------------------------------------------------------

/// Spawns `program args...`; the child must run [`crate::worker::run_stdio`].
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Re-invoke the running binary with its `worker` subcommand.
    pub fn current_exe() -> Result<Self, SupervisorError> {
        let program = std::env::current_exe().map_err(|e| SupervisorError::Launch(e.to_string()))?;
        Ok(Self::new(program, vec!["worker".to_owned()]))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<WorkerConnection, SupervisorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SupervisorError::Launch(format!("{}: {e}", self.program.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::Launch("worker stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::Launch("worker stdout was not captured".into()))?;

        info!(pid = child.id(), "spawned worker process");
        let (channel, _writer) = channel::json_lines(stdout, stdin);
        Ok(WorkerConnection { channel, handle: WorkerHandle::Process(child) })
    }
}

// ---------------------------------------------------------------------------
// In-process task
// ---------------------------------------------------------------------------

/// Runs the worker on the supervisor's runtime. No fault isolation; used by
/// tests and single-shot CLI runs.
#[derive(Clone)]
pub struct InProcessLauncher {
    worker: Worker,
}

impl InProcessLauncher {
    pub fn new(worker: Worker) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self) -> Result<WorkerConnection, SupervisorError> {
        let (supervisor_side, worker_side) = channel::pair();
        let worker = self.worker.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = worker.serve(worker_side).await {
                warn!("in-process worker stopped: {e}");
            }
        });
        Ok(WorkerConnection { channel: supervisor_side, handle: WorkerHandle::Task(task) })
    }
}

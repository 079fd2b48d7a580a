//! What the scheduler runs workflows through.

use async_trait::async_trait;
use tracing::warn;

use engine::{ExecutionId, ExecutionMode, ExecutionResult, Workflow};
use runner::{StartRequest, Supervisor};

use crate::BatchError;

/// Runs one workflow to completion. Dropping the returned future abandons
/// the run; implementations should stop it when that happens.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute(&self, workflow: Workflow) -> Result<ExecutionResult, BatchError>;
}

/// Runs workflows through the supervisor in `cli` mode.
#[derive(Clone)]
pub struct SupervisorExecutor {
    supervisor: Supervisor,
}

impl SupervisorExecutor {
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }
}

/// Stops the execution unless disarmed.
struct StopOnDrop {
    supervisor: Supervisor,
    execution_id: Option<ExecutionId>,
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if let Some(id) = self.execution_id.take() {
            warn!(execution_id = %id, "abandoning execution");
            let _ = self.supervisor.stop(&id);
        }
    }
}

#[async_trait]
impl BatchExecutor for SupervisorExecutor {
    async fn execute(&self, workflow: Workflow) -> Result<ExecutionResult, BatchError> {
        let handle = self.supervisor.start(StartRequest::new(workflow, ExecutionMode::Cli)).await?;
        let mut guard = StopOnDrop {
            supervisor: self.supervisor.clone(),
            execution_id: Some(handle.execution_id.clone()),
        };
        let result = handle.wait().await;
        guard.execution_id = None;
        Ok(result?)
    }
}

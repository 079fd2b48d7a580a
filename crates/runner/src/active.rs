//! Registry of executions the supervisor is currently driving.
//!
//! Top-level runs and the nested runs they spawn share one table. Nested
//! entries point at their parent; results are routed strictly by execution
//! id, never by arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use engine::{ExecutionId, ExecutionResult, WorkflowId};

struct Entry {
    workflow_id: WorkflowId,
    parent: Option<ExecutionId>,
    stop: CancellationToken,
    waiters: Vec<oneshot::Sender<ExecutionResult>>,
}

#[derive(Clone, Default)]
pub struct ActiveExecutions {
    inner: Arc<Mutex<HashMap<ExecutionId, Entry>>>,
}

impl ActiveExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ExecutionId, Entry>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a new execution and return the token that requests its stop.
    pub fn register(
        &self,
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        parent: Option<ExecutionId>,
    ) -> CancellationToken {
        let stop = CancellationToken::new();
        self.table().insert(
            execution_id,
            Entry { workflow_id, parent, stop: stop.clone(), waiters: Vec::new() },
        );
        stop
    }

    /// Receiver resolved with the execution's result. `None` if it is not
    /// (or no longer) running.
    pub fn subscribe(&self, execution_id: &str) -> Option<oneshot::Receiver<ExecutionResult>> {
        let mut table = self.table();
        let entry = table.get_mut(execution_id)?;
        let (tx, rx) = oneshot::channel();
        entry.waiters.push(tx);
        Some(rx)
    }

    /// Remove the execution and hand its result to every subscriber.
    pub fn finish(&self, execution_id: &str, result: &ExecutionResult) -> bool {
        let Some(entry) = self.table().remove(execution_id) else {
            debug!(%execution_id, "finish for an execution that is not tracked");
            return false;
        };
        for waiter in entry.waiters {
            let _ = waiter.send(result.clone());
        }
        true
    }

    pub fn stop(&self, execution_id: &str) -> bool {
        match self.table().get(execution_id) {
            Some(entry) => {
                entry.stop.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, execution_id: &str) -> bool {
        self.table().contains_key(execution_id)
    }

    pub fn workflow_of(&self, execution_id: &str) -> Option<WorkflowId> {
        self.table().get(execution_id).map(|e| e.workflow_id.clone())
    }

    pub fn parent_of(&self, execution_id: &str) -> Option<ExecutionId> {
        self.table().get(execution_id).and_then(|e| e.parent.clone())
    }

    pub fn children_of(&self, parent: &str) -> Vec<ExecutionId> {
        let mut children: Vec<ExecutionId> = self
            .table()
            .iter()
            .filter(|(_, e)| e.parent.as_deref() == Some(parent))
            .map(|(id, _)| id.clone())
            .collect();
        children.sort();
        children
    }

    pub fn running_ids(&self) -> Vec<ExecutionId> {
        let mut ids: Vec<ExecutionId> = self.table().keys().cloned().collect();
        ids.sort();
        ids
    }
}

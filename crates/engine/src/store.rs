//! Persistence and credential collaborators.
//!
//! The runtime only talks to storage through these traits. [`MemoryStore`]
//! backs tests and database-less CLI runs; [`crate::postgres::PgStore`] is
//! the production implementation.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::models::{ExecutionId, ExecutionMode, ExecutionResult, Workflow, WorkflowId};
use crate::StoreError;

/// Selection used by [`WorkflowStore::find_many`].
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub active: Option<bool>,
    pub ids: Option<Vec<WorkflowId>>,
}

impl WorkflowFilter {
    pub fn active() -> Self {
        Self { active: Some(true), ids: None }
    }

    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.active.map_or(true, |a| workflow.active == a)
            && self.ids.as_ref().map_or(true, |ids| ids.contains(&workflow.id))
    }
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Workflow>, StoreError>;

    async fn find_many(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, StoreError>;

    async fn save_static_data(&self, id: &str, static_data: &Value) -> Result<(), StoreError>;
}

/// Row written when the supervisor allocates an execution id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub workflow_id: WorkflowId,
    pub mode: ExecutionMode,
    pub retry_of: Option<ExecutionId>,
    /// Set for nested executions started from inside another run.
    pub parent: Option<ExecutionId>,
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Allocate a fresh execution id.
    async fn create_execution(&self, new: &NewExecution) -> Result<ExecutionId, StoreError>;

    async fn finish_execution(&self, id: &str, result: &ExecutionResult) -> Result<(), StoreError>;
}

/// Decrypts the credentials a workflow references.
#[async_trait]
pub trait CredentialsResolver: Send + Sync {
    async fn decrypt(&self, workflow: &Workflow) -> Result<HashMap<String, Value>, StoreError>;
}

/// Resolver for deployments without credentials.
pub struct NoCredentials;

#[async_trait]
impl CredentialsResolver for NoCredentials {
    async fn decrypt(&self, _workflow: &Workflow) -> Result<HashMap<String, Value>, StoreError> {
        Ok(HashMap::new())
    }
}

/// Credentials held in memory, already decrypted.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub HashMap<String, Value>);

#[async_trait]
impl CredentialsResolver for StaticCredentials {
    async fn decrypt(&self, workflow: &Workflow) -> Result<HashMap<String, Value>, StoreError> {
        Ok(workflow
            .nodes
            .iter()
            .flat_map(|n| n.credentials.values())
            .filter_map(|name| self.0.get(name).map(|v| (name.clone(), v.clone())))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredExecution {
    pub new: NewExecution,
    pub result: Option<ExecutionResult>,
}

/// In-memory workflow and execution store.
#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<BTreeMap<WorkflowId, Workflow>>,
    executions: RwLock<BTreeMap<u64, StoredExecution>>,
    next_execution: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflows(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        let store = Self::new();
        for wf in workflows {
            store.insert_workflow(wf);
        }
        store
    }

    /// Load every `*.json` file in `dir` as a workflow definition.
    pub async fn load_dir(dir: &Path) -> Result<Self, StoreError> {
        let store = Self::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Workflow>(&raw) {
                Ok(wf) => store.insert_workflow(wf),
                Err(e) => warn!("skipping {}: {e}", path.display()),
            }
        }
        info!("loaded {} workflows from {}", store.workflow_count(), dir.display());
        Ok(store)
    }

    pub fn insert_workflow(&self, workflow: Workflow) {
        let mut guard = self.workflows.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(workflow.id.clone(), workflow);
    }

    pub fn workflow_count(&self) -> usize {
        self.workflows.read().map(|w| w.len()).unwrap_or(0)
    }

    pub fn execution(&self, id: &str) -> Option<StoredExecution> {
        let id: u64 = id.parse().ok()?;
        self.executions.read().ok()?.get(&id).cloned()
    }

    pub fn execution_count(&self) -> usize {
        self.executions.read().map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        let guard = self.workflows.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(id).cloned())
    }

    async fn find_many(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, StoreError> {
        let guard = self.workflows.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.values().filter(|wf| filter.matches(wf)).cloned().collect())
    }

    async fn save_static_data(&self, id: &str, static_data: &Value) -> Result<(), StoreError> {
        let mut guard = self.workflows.write().unwrap_or_else(|e| e.into_inner());
        let wf = guard.get_mut(id).ok_or_else(|| StoreError::WorkflowNotFound(id.to_owned()))?;
        wf.static_data = static_data.clone();
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_execution(&self, new: &NewExecution) -> Result<ExecutionId, StoreError> {
        let id = self.next_execution.fetch_add(1, Ordering::SeqCst) + 1;
        let mut guard = self.executions.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(id, StoredExecution { new: new.clone(), result: None });
        Ok(id.to_string())
    }

    async fn finish_execution(&self, id: &str, result: &ExecutionResult) -> Result<(), StoreError> {
        let key: u64 = id.parse().map_err(|_| StoreError::ExecutionNotFound(id.to_owned()))?;
        let mut guard = self.executions.write().unwrap_or_else(|e| e.into_inner());
        let stored = guard
            .get_mut(&key)
            .ok_or_else(|| StoreError::ExecutionNotFound(id.to_owned()))?;
        stored.result = Some(result.clone());
        Ok(())
    }
}

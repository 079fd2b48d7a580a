//! Postgres-backed implementation of the store traits.

use async_trait::async_trait;
use serde_json::Value;

use db::models::{ExecutionStatus, WorkflowRow};
use db::repository::{executions as exec_repo, workflows as wf_repo};
use db::{DbError, DbPool};

use crate::models::{ExecutionId, ExecutionResult, Workflow};
use crate::store::{ExecutionStore, NewExecution, WorkflowFilter, WorkflowStore};
use crate::StoreError;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Decode a row; the columns win over whatever the definition JSON says.
fn workflow_from_row(row: WorkflowRow) -> Result<Workflow, StoreError> {
    let mut workflow: Workflow = serde_json::from_value(row.definition)
        .map_err(|e| StoreError::Malformed { id: row.id.clone(), reason: e.to_string() })?;
    workflow.id = row.id;
    workflow.name = row.name;
    workflow.active = row.active;
    if let Some(static_data) = row.static_data {
        workflow.static_data = static_data;
    }
    Ok(workflow)
}

fn status_of(result: &ExecutionResult) -> ExecutionStatus {
    match (result.finished, result.error()) {
        (true, _) => ExecutionStatus::Success,
        (false, Some(_)) => ExecutionStatus::Error,
        (false, None) => ExecutionStatus::Canceled,
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        match wf_repo::get_workflow(&self.pool, id).await {
            Ok(row) => workflow_from_row(row).map(Some),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_many(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, StoreError> {
        let rows = wf_repo::list_workflows(&self.pool, filter.active, filter.ids.as_deref()).await?;
        rows.into_iter().map(workflow_from_row).collect()
    }

    async fn save_static_data(&self, id: &str, static_data: &Value) -> Result<(), StoreError> {
        wf_repo::update_static_data(&self.pool, id, static_data).await.map_err(|e| match e {
            DbError::NotFound => StoreError::WorkflowNotFound(id.to_owned()),
            other => other.into(),
        })
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn create_execution(&self, new: &NewExecution) -> Result<ExecutionId, StoreError> {
        let retry_of = new.retry_of.as_deref().map(exec_repo::parse_execution_id).transpose()?;
        let parent = new.parent.as_deref().map(exec_repo::parse_execution_id).transpose()?;
        let row = exec_repo::create_execution(
            &self.pool,
            &new.workflow_id,
            new.mode.as_str(),
            retry_of,
            parent,
        )
        .await?;
        Ok(row.id.to_string())
    }

    async fn finish_execution(&self, id: &str, result: &ExecutionResult) -> Result<(), StoreError> {
        let key = exec_repo::parse_execution_id(id)?;
        let data = serde_json::to_value(result)
            .map_err(|e| StoreError::Malformed { id: id.to_owned(), reason: e.to_string() })?;
        exec_repo::finish_execution(&self.pool, key, status_of(result), result.finished, data)
            .await
            .map_err(|e| match e {
                DbError::NotFound => StoreError::ExecutionNotFound(id.to_owned()),
                other => other.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionError, ExecutionMode};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn row_columns_override_definition() {
        let row = WorkflowRow {
            id: "5".into(),
            name: "from-column".into(),
            active: true,
            definition: json!({ "id": "stale", "name": "stale", "nodes": [] }),
            static_data: Some(json!({ "seen": 3 })),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let wf = workflow_from_row(row).unwrap();
        assert_eq!(wf.id, "5");
        assert_eq!(wf.name, "from-column");
        assert!(wf.active);
        assert_eq!(wf.static_data, json!({ "seen": 3 }));
    }

    #[test]
    fn malformed_definition_is_reported_with_id() {
        let row = WorkflowRow {
            id: "9".into(),
            name: "bad".into(),
            active: false,
            definition: json!({ "nodes": "not-a-list" }),
            static_data: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(workflow_from_row(row), Err(StoreError::Malformed { id, .. }) if id == "9"));
    }

    #[test]
    fn status_reflects_result_shape() {
        let mut result = ExecutionResult::new(ExecutionMode::Cli, Utc::now());
        assert_eq!(status_of(&result), ExecutionStatus::Canceled);
        result.result_data.error = Some(ExecutionError::new("E", "boom"));
        assert_eq!(status_of(&result), ExecutionStatus::Error);
        result.result_data.error = None;
        result.finished = true;
        assert_eq!(status_of(&result), ExecutionStatus::Success);
    }
}

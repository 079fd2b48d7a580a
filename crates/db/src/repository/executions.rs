//! Execution repository functions.

use chrono::Utc;
use sqlx::PgPool;

use crate::{
    models::{ExecutionRow, ExecutionStatus},
    DbError,
};

/// Create a new execution record in `running` status and return its id.
///
/// The database sequence is the single source of execution ids.
pub async fn create_execution(
    pool: &PgPool,
    workflow_id: &str,
    mode: &str,
    retry_of: Option<i64>,
    parent_id: Option<i64>,
) -> Result<ExecutionRow, DbError> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        INSERT INTO executions (workflow_id, mode, status, finished, retry_of, parent_id, started_at)
        VALUES ($1, $2, $3, FALSE, $4, $5, $6)
        RETURNING id, workflow_id, mode, status, finished, retry_of, parent_id, data, started_at, stopped_at
        "#,
    )
    .bind(workflow_id)
    .bind(mode)
    .bind(ExecutionStatus::Running.to_string())
    .bind(retry_of)
    .bind(parent_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Store the terminal result of an execution.
pub async fn finish_execution(
    pool: &PgPool,
    id: i64,
    status: ExecutionStatus,
    finished: bool,
    data: serde_json::Value,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE executions
        SET status = $1, finished = $2, data = $3, stopped_at = $4
        WHERE id = $5
        "#,
    )
    .bind(status.to_string())
    .bind(finished)
    .bind(data)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// Parse the string form of an execution id used by the rest of the runtime.
pub fn parse_execution_id(id: &str) -> Result<i64, DbError> {
    id.parse().map_err(|_| DbError::InvalidExecutionId(id.to_owned()))
}

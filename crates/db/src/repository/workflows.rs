//! Workflow read/write operations.

use chrono::Utc;
use sqlx::PgPool;

use crate::{models::WorkflowRow, DbError};

const COLUMNS: &str = "id, name, active, definition, static_data, created_at, updated_at";

/// Insert or replace a workflow definition.
///
/// `definition` must be a valid JSON object produced by serialising the
/// domain `Workflow` type from the `engine` crate.
pub async fn upsert_workflow(
    pool: &PgPool,
    id: &str,
    name: &str,
    active: bool,
    definition: serde_json::Value,
) -> Result<WorkflowRow, DbError> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        INSERT INTO workflows (id, name, active, definition, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                active = EXCLUDED.active,
                definition = EXCLUDED.definition,
                updated_at = EXCLUDED.updated_at
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(name)
    .bind(active)
    .bind(definition)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: &str) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return workflows ordered by id, optionally filtered by `active` flag
/// and/or an id list.
pub async fn list_workflows(
    pool: &PgPool,
    active: Option<bool>,
    ids: Option<&[String]>,
) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM workflows
        WHERE ($1::BOOLEAN IS NULL OR active = $1)
          AND ($2::TEXT[] IS NULL OR id = ANY($2))
        ORDER BY id
        "#
    ))
    .bind(active)
    .bind(ids.map(|ids| ids.to_vec()))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Overwrite the workflow's static data.
///
/// Returns `DbError::NotFound` if no row was updated.
pub async fn update_static_data(
    pool: &PgPool,
    id: &str,
    static_data: &serde_json::Value,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE workflows SET static_data = $1, updated_at = $2 WHERE id = $3",
    )
    .bind(static_data)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

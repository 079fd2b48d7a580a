//! Arming and cancelling test webhooks.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use webhooks::ArmResult;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

pub async fn arm(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, ApiError> {
    let workflow = state
        .workflows
        .find_by_id(&workflow_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("workflow '{workflow_id}' not found")))?;

    let body = match state.tests.arm(workflow, query.session_id)? {
        ArmResult::NothingToTest => json!({ "data": { "waitingForWebhook": false } }),
        ArmResult::Armed(handle) => {
            json!({ "data": { "waitingForWebhook": true, "paths": handle.paths } })
        }
    };
    Ok(Json(body))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Json<Value> {
    Json(json!({ "data": state.tests.cancel(&workflow_id) }))
}

//! Activation of production webhooks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use webhooks::ActivationMode;

use crate::{ApiError, AppState};

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": state.active.active_workflow_ids() }))
}

pub async fn activate(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.active.add(&workflow_id, ActivationMode::Activate).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deactivate(State(state): State<AppState>, Path(workflow_id): Path<String>) -> StatusCode {
    state.active.remove(&workflow_id);
    StatusCode::NO_CONTENT
}

pub async fn error(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Json<Value> {
    Json(json!({ "data": state.active.get_activation_error(&workflow_id) }))
}

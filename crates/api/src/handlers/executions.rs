use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::{ApiError, AppState};

pub async fn stop(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.supervisor.stop(&execution_id)?;
    Ok(StatusCode::ACCEPTED)
}

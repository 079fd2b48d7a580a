//! Server-sent push events for one browser session.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushQuery {
    pub session_id: Option<String>,
}

pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<PushQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session_id = query
        .session_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::new(axum::http::StatusCode::BAD_REQUEST, "sessionId is required"))?;
    debug!(%session_id, "push stream opened");

    let events = BroadcastStream::new(state.push.subscribe(&session_id)).filter_map(|received| {
        match received {
            Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    warn!("could not encode push event: {e}");
                    None
                }
            },
            // Lagged receivers skip what they missed.
            Err(_) => None,
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(10)).text("keepalive")))
}

//! `api` crate — HTTP surface.
//!
//! Routes:
//!   ANY    /webhook/*path                      production webhooks
//!   ANY    /webhook-test/*path                 armed test webhooks
//!   POST   /rest/test-webhook/:workflow_id     arm a workflow for testing
//!   DELETE /rest/test-webhook/:workflow_id     cancel a test session
//!   GET    /rest/active-workflows              active workflow ids
//!   POST   /rest/active-workflows/:workflow_id activate
//!   DELETE /rest/active-workflows/:workflow_id deactivate
//!   GET    /rest/active-workflows/:workflow_id/error
//!   POST   /rest/executions/:execution_id/stop
//!   GET    /rest/push?sessionId=               server-sent push events
//!   GET    /healthz

pub mod error;
pub mod handlers;
pub mod push;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use engine::WorkflowStore;
use runner::Supervisor;
use webhooks::{ActiveWorkflows, TestWebhooks};

pub use error::ApiError;
pub use push::PushHub;

#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<dyn WorkflowStore>,
    pub supervisor: Supervisor,
    pub active: Arc<ActiveWorkflows>,
    pub tests: TestWebhooks,
    pub push: Arc<PushHub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/webhook/*path", any(handlers::webhooks::production))
        .route("/webhook-test/*path", any(handlers::webhooks::test))
        .route(
            "/rest/test-webhook/:workflow_id",
            post(handlers::test_webhooks::arm).delete(handlers::test_webhooks::cancel),
        )
        .route("/rest/active-workflows", get(handlers::active::list))
        .route(
            "/rest/active-workflows/:workflow_id",
            post(handlers::active::activate).delete(handlers::active::deactivate),
        )
        .route("/rest/active-workflows/:workflow_id/error", get(handlers::active::error))
        .route("/rest/executions/:execution_id/stop", post(handlers::executions::stop))
        .route("/rest/push", get(handlers::push::stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    bind: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
}

#[cfg(test)]
mod router_tests;

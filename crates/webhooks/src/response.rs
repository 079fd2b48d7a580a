//! Request and response shapes for webhook calls, independent of the HTTP
//! server.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::warn;

use nodes::{HttpMethod, ResponseMode};
use runner::ExecutionHandle;

use crate::WebhookError;

/// An inbound webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub method: HttpMethod,
    /// Path below the lifecycle prefix (`/webhook/` or `/webhook-test/`).
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Value,
}

impl WebhookRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: Value::Null,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// The item handed to the start node.
    pub fn into_item(self, params: BTreeMap<String, String>) -> Value {
        let to_object = |map: BTreeMap<String, String>| {
            Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect::<Map<_, _>>())
        };
        json!({
            "headers": to_object(self.headers),
            "params": to_object(params),
            "query": to_object(self.query),
            "body": self.body,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

impl WebhookResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }
}

/// Produce the HTTP answer for a started execution.
pub async fn respond(
    mode: ResponseMode,
    handle: ExecutionHandle,
) -> Result<WebhookResponse, WebhookError> {
    match mode {
        ResponseMode::OnReceived => Ok(WebhookResponse::ok(json!({ "message": "Workflow was started" }))),
        ResponseMode::LastNode => {
            let execution_id = handle.execution_id.clone();
            let result = handle.wait().await?;
            if let Some(error) = result.error() {
                warn!(%execution_id, "webhook execution failed: {}", error.message);
                return Err(WebhookError::Response { status: 500, message: error.message.clone() });
            }
            let body = result
                .last_output()
                .and_then(|items| items.first())
                .cloned()
                .unwrap_or_else(|| json!({}));
            Ok(WebhookResponse::ok(body))
        }
    }
}

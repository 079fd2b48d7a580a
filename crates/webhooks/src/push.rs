//! Events pushed to browser sessions.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use runner::UiSink;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum PushEvent {
    #[serde(rename_all = "camelCase")]
    TestWebhookReceived { workflow_id: String, execution_id: String },
    #[serde(rename_all = "camelCase")]
    TestWebhookDeleted { workflow_id: String },
    #[serde(rename = "sendMessageToUI", rename_all = "camelCase")]
    SendMessageToUi { execution_id: String, payload: Value },
}

impl PushEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TestWebhookReceived { .. } => "testWebhookReceived",
            Self::TestWebhookDeleted { .. } => "testWebhookDeleted",
            Self::SendMessageToUi { .. } => "sendMessageToUI",
        }
    }
}

/// Delivers events to a session. Delivery is best effort; unknown sessions
/// are ignored.
pub trait Push: Send + Sync {
    fn push(&self, session_id: &str, event: PushEvent);
}

pub struct NoPush;

impl Push for NoPush {
    fn push(&self, _session_id: &str, _event: PushEvent) {}
}

/// Routes supervisor UI messages onto the push channel.
pub struct PushUiSink(pub Arc<dyn Push>);

impl UiSink for PushUiSink {
    fn send_to_ui(&self, session_id: &str, execution_id: &str, payload: Value) {
        self.0.push(
            session_id,
            PushEvent::SendMessageToUi { execution_id: execution_id.to_owned(), payload },
        );
    }
}

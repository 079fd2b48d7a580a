//! `webhooks` crate — webhook registration and request dispatch.
//!
//! * [`registry`] — the key table shared by both lifecycles.
//! * [`active`] — webhooks of deployed workflows.
//! * [`test_webhooks`] — short-lived webhooks for manual testing.
//! * [`push`] — events sent to browser sessions.
//! * [`response`] — request items and HTTP answers.

pub mod active;
pub mod error;
pub mod push;
pub mod registry;
pub mod response;
pub mod test_webhooks;

pub use active::{ActivationMode, ActiveWorkflows};
pub use error::WebhookError;
pub use push::{NoPush, Push, PushEvent, PushUiSink};
pub use registry::{
    collect_webhooks, normalize_path, WebhookMatch, WebhookRegistration, WebhookRegistry,
    WebhookScope,
};
pub use response::{respond, WebhookRequest, WebhookResponse};
pub use test_webhooks::{ArmResult, TestOutcome, TestWebhookConfig, TestWebhookHandle, TestWebhooks};

#[cfg(test)]
mod lifecycle_tests;

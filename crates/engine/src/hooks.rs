//! Lifecycle hooks fired by [`crate::WorkflowExecutor`] while it runs.
//!
//! In a worker these are forwarded to the supervisor as protocol messages;
//! tests use them to observe ordering.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{ExecutionResult, NodeRun};

#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    async fn workflow_execute_before(&self) {}

    async fn node_execute_before(&self, _node: &str) {}

    async fn node_execute_after(&self, _node: &str, _run: &NodeRun) {}

    async fn workflow_execute_after(&self, _result: &ExecutionResult) {}

    async fn send_message_to_ui(&self, _payload: Value) {}
}

/// Hooks that do nothing.
pub struct NoopHooks;

impl ExecutionHooks for NoopHooks {}

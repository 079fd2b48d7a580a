//! The `ExecutableNode` trait — the contract every node must fulfil.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{NodeError, WebhookDescription};

/// Runs another workflow on behalf of a node and returns its last output.
///
/// The worker provides the implementation; it routes execution-id
/// allocation through the supervisor before running the child locally.
#[async_trait]
pub trait SubWorkflowRunner: Send + Sync {
    async fn run_workflow(&self, definition: Value, input: Vec<Value>) -> Result<Vec<Value>, NodeError>;
}

/// Receives `sendMessageToUI` payloads from nodes. Delivery is only
/// guaranteed for manual runs.
#[async_trait]
pub trait UiMessageSink: Send + Sync {
    async fn send_message_to_ui(&self, payload: Value);
}

/// The workflow's static data, shared by all nodes of one run.
#[derive(Debug, Clone, Default)]
pub struct StaticData(Arc<Mutex<Value>>);

impl StaticData {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.lock().map(|v| v.clone()).unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set(&self, value: Value) {
        match self.0.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

/// Shared context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: String,
    /// ID of the current execution run.
    pub execution_id: String,
    /// Name of the node being executed.
    pub node_name: String,
    /// Decrypted credentials scoped to this execution, keyed by credential name.
    pub credentials: HashMap<String, Value>,
    /// Present when the node may invoke other workflows.
    pub sub_workflows: Option<Arc<dyn SubWorkflowRunner>>,
    pub ui: Option<Arc<dyn UiMessageSink>>,
    pub static_data: StaticData,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workflow_id", &self.workflow_id)
            .field("execution_id", &self.execution_id)
            .field("node_name", &self.node_name)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .field("sub_workflows", &self.sub_workflows.is_some())
            .field("static_data", &self.static_data)
            .finish()
    }
}

/// The core node trait.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node on the items produced by its parents and return
    /// this node's output items.
    async fn execute(
        &self,
        parameters: &Value,
        input: Vec<Value>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Value>, NodeError>;

    /// Webhooks this node needs registered, derived from its parameters.
    fn webhooks(&self, _parameters: &Value) -> Vec<WebhookDescription> {
        Vec::new()
    }
}

//! Messages exchanged between the supervisor and a worker.
//!
//! Both enums are adjacently tagged (`{"type": "...", "data": {...}}`) with
//! camelCase names. The set of variants is closed: anything else arriving
//! on the channel is a [`crate::ProtocolViolation`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use engine::{ExecutionError, ExecutionId, ExecutionRequest, ExecutionResult, NodeRun, Workflow};
use nodes::{CredentialTypeInfo, NodeTypeInfo};

// ---------------------------------------------------------------------------
// Supervisor → worker
// ---------------------------------------------------------------------------

/// Payload of `startWorkflow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflow {
    pub request: ExecutionRequest,
    /// Node types the workflow uses, as resolved by the supervisor.
    #[serde(default)]
    pub node_types: Vec<NodeTypeInfo>,
    #[serde(default)]
    pub credential_types: Vec<CredentialTypeInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SupervisorMessage {
    StartWorkflow(StartWorkflow),
    /// Answer to the oldest outstanding `startExecution`.
    #[serde(rename_all = "camelCase")]
    ExecutionId { execution_id: ExecutionId },
    StopExecution,
    Timeout,
}

// ---------------------------------------------------------------------------
// Worker → supervisor
// ---------------------------------------------------------------------------

/// Payload of `startExecution`: a workflow a node wants to run as a sub-call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedRunRequest {
    pub workflow_data: Workflow,
    #[serde(default)]
    pub input: Vec<Value>,
}

/// Serialised error carried by `processError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub name: String,
}

impl ProcessError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { message: message.into(), stack: None, name: name.into() }
    }
}

impl From<ProcessError> for ExecutionError {
    fn from(e: ProcessError) -> Self {
        ExecutionError { message: e.message, name: e.name, stack: e.stack, node: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WorkerMessage {
    Start,
    #[serde(rename_all = "camelCase")]
    NodeExecuteBefore { node_name: String },
    #[serde(rename_all = "camelCase")]
    NodeExecuteAfter { node_name: String, data: NodeRun },
    WorkflowExecuteBefore,
    WorkflowExecuteAfter { result: ExecutionResult },
    #[serde(rename = "sendMessageToUI")]
    SendMessageToUi { payload: Value },
    StartExecution(NestedRunRequest),
    #[serde(rename_all = "camelCase")]
    FinishExecution { execution_id: ExecutionId, result: Option<ExecutionResult> },
    End { result: ExecutionResult },
    Timeout { result: ExecutionResult },
    ProcessError(ProcessError),
}

impl WorkerMessage {
    /// `end`, `timeout` and `processError` close a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Timeout { .. } | Self::ProcessError(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::NodeExecuteBefore { .. } => "nodeExecuteBefore",
            Self::NodeExecuteAfter { .. } => "nodeExecuteAfter",
            Self::WorkflowExecuteBefore => "workflowExecuteBefore",
            Self::WorkflowExecuteAfter { .. } => "workflowExecuteAfter",
            Self::SendMessageToUi { .. } => "sendMessageToUI",
            Self::StartExecution(_) => "startExecution",
            Self::FinishExecution { .. } => "finishExecution",
            Self::End { .. } => "end",
            Self::Timeout { .. } => "timeout",
            Self::ProcessError(_) => "processError",
        }
    }
}

//! Core domain models for the execution runtime.
//!
//! These types are the source of truth for what a workflow and a run look
//! like in memory. They serialise to the camelCase JSON used in the
//! `workflows.definition` column, in snapshots and on the worker channel.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type WorkflowId = String;
pub type ExecutionId = String;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique within the workflow; connections refer to nodes by name.
    pub name: String,
    /// Maps to a registered `ExecutableNode` implementation.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub parameters: Value,
    /// Free-text notes. Batch runs read test annotations from here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Opaque id prefix for webhooks with dynamic path segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    /// Credential type → credential name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, String>,
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            parameters,
            notes: None,
            webhook_id: None,
            disabled: false,
            credentials: BTreeMap::new(),
        }
    }
}

/// Downstream end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub node: String,
    #[serde(default)]
    pub index: usize,
}

/// Source node name → downstream targets.
pub type Connections = BTreeMap<String, Vec<ConnectionTarget>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    /// Seconds; `-1` disables the timeout, `None` uses the runtime default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout: Option<i64>,
    #[serde(default)]
    pub save_execution_progress: bool,
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Connections,
    #[serde(default)]
    pub active: bool,
    /// Cross-run cache owned by the workflow. Persisted by the caller after
    /// a run when it changes.
    #[serde(default)]
    pub static_data: Value,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(id: impl Into<String>, name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes,
            connections: Connections::new(),
            active: false,
            static_data: Value::Null,
            settings: WorkflowSettings::default(),
        }
    }

    /// Builder-style helper: connect `from` → `to` on input 0.
    pub fn connect(mut self, from: &str, to: &str) -> Self {
        self.connections
            .entry(from.to_owned())
            .or_default()
            .push(ConnectionTarget { node: to.to_owned(), index: 0 });
        self
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Parents of `name` ordered by the input index they feed.
    pub fn parents(&self, name: &str) -> Vec<&str> {
        let mut parents: Vec<(usize, &str)> = self
            .connections
            .iter()
            .flat_map(|(from, targets)| {
                targets
                    .iter()
                    .filter(move |t| t.node == name)
                    .map(move |t| (t.index, from.as_str()))
            })
            .collect();
        parents.sort();
        parents.into_iter().map(|(_, p)| p).collect()
    }
}

// ---------------------------------------------------------------------------
// Execution request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Manual,
    Trigger,
    Webhook,
    Retry,
    Cli,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Trigger => "trigger",
            Self::Webhook => "webhook",
            Self::Retry => "retry",
            Self::Cli => "cli",
        }
    }
}

/// Everything a worker needs to run one execution. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Allocated by the supervisor, never by the worker.
    pub execution_id: ExecutionId,
    pub workflow_data: Workflow,
    #[serde(default)]
    pub credentials: HashMap<String, Value>,
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub start_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_node: Option<String>,
    /// Results of a previous run; nodes present here are not re-executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_data: Option<RunData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<ExecutionId>,
    /// UI connection that should receive push events for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Items handed to the start nodes (e.g. the webhook request).
    #[serde(default)]
    pub trigger_input: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// Serialised error; crosses the worker boundary as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub message: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl ExecutionError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { message: message.into(), name: name.into(), stack: None, node: None }
    }

    pub fn at_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn timed_out() -> Self {
        Self::new("RunnerTimeout", "Workflow execution timed out!")
    }
}

/// One run of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRun {
    pub start_time: DateTime<Utc>,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub output: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

/// Node name → runs of that node, in order.
pub type RunData = BTreeMap<String, Vec<NodeRun>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultData {
    #[serde(default)]
    pub run_data: RunData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_node_executed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

/// Terminal outcome of an execution. Produced exactly once per run,
/// whether it completed, was stopped or timed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub finished: bool,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    pub result_data: ResultData,
    /// Set when the run rewrote the workflow's static data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_data: Option<Value>,
}

impl ExecutionResult {
    pub fn new(mode: ExecutionMode, started_at: DateTime<Utc>) -> Self {
        Self {
            finished: false,
            mode,
            started_at,
            stopped_at: None,
            result_data: ResultData::default(),
            static_data: None,
        }
    }

    /// A failed result carrying only an error.
    pub fn failed(mode: ExecutionMode, started_at: DateTime<Utc>, error: ExecutionError) -> Self {
        let mut result = Self::new(mode, started_at);
        result.result_data.error = Some(error);
        result.stopped_at = Some(Utc::now());
        result
    }

    /// Timeout result keeping whatever run data was produced.
    pub fn timed_out(mode: ExecutionMode, started_at: DateTime<Utc>, run_data: RunData) -> Self {
        let mut result = Self::failed(mode, started_at, ExecutionError::timed_out());
        result.result_data.run_data = run_data;
        result
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.result_data.error.as_ref()
    }

    /// Output of the last run of the last executed node.
    pub fn last_output(&self) -> Option<&[Value]> {
        let node = self.result_data.last_node_executed.as_ref()?;
        self.result_data
            .run_data
            .get(node)
            .and_then(|runs| runs.last())
            .map(|run| run.output.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parents_follow_input_index_order() {
        let mut wf = Workflow::new("1", "merge", vec![
            Node::new("a", "noOp", Value::Null),
            Node::new("b", "noOp", Value::Null),
            Node::new("m", "noOp", Value::Null),
        ]);
        wf.connections.insert("b".into(), vec![ConnectionTarget { node: "m".into(), index: 0 }]);
        wf.connections.insert("a".into(), vec![ConnectionTarget { node: "m".into(), index: 1 }]);
        assert_eq!(wf.parents("m"), vec!["b", "a"]);
    }

    #[test]
    fn workflow_deserialises_from_camel_case_definition() {
        let wf: Workflow = serde_json::from_value(json!({
            "id": "7",
            "name": "hook",
            "nodes": [{ "name": "Webhook", "type": "webhook", "parameters": { "path": "x" }, "webhookId": "abc" }],
            "connections": { "Webhook": [{ "node": "Next" }] },
            "settings": { "executionTimeout": 30 }
        }))
        .unwrap();
        assert_eq!(wf.nodes[0].webhook_id.as_deref(), Some("abc"));
        assert_eq!(wf.connections["Webhook"][0].index, 0);
        assert_eq!(wf.settings.execution_timeout, Some(30));
        assert!(!wf.active);
    }

    #[test]
    fn timed_out_result_is_unfinished_with_error() {
        let result = ExecutionResult::timed_out(ExecutionMode::Manual, Utc::now(), RunData::new());
        assert!(!result.finished);
        assert_eq!(result.error().map(|e| e.name.as_str()), Some("RunnerTimeout"));
        assert!(result.stopped_at.is_some());
    }
}

//! Tests for the in-worker execution engine.
//!
//! Nodes are `MockNode`s registered under ad-hoc type names, so no
//! persistence or worker process is involved.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use nodes::mock::MockNode;
use nodes::{ExecutableNode, ExecutionContext, NodeError, NodeTypes};

use crate::dag::validate_dag;
use crate::hooks::{ExecutionHooks, NoopHooks};
use crate::models::{ExecutionMode, ExecutionRequest, ExecutionResult, Node, NodeRun, Workflow};
use crate::{EngineError, ExecutorConfig, RunEnv, WorkflowExecutor};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn linear_workflow(names: &[&str]) -> Workflow {
    let nodes = names.iter().map(|n| Node::new(*n, *n, Value::Null)).collect();
    let mut wf = Workflow::new("wf-linear", "linear", nodes);
    for pair in names.windows(2) {
        wf = wf.connect(pair[0], pair[1]);
    }
    wf
}

fn request(workflow: Workflow) -> ExecutionRequest {
    ExecutionRequest {
        execution_id: "1".into(),
        workflow_data: workflow,
        credentials: Default::default(),
        execution_mode: ExecutionMode::Manual,
        start_nodes: Vec::new(),
        destination_node: None,
        run_data: None,
        retry_of: None,
        session_id: None,
        trigger_input: Vec::new(),
    }
}

fn executor(types: NodeTypes) -> WorkflowExecutor {
    WorkflowExecutor::new(
        types,
        ExecutorConfig { max_retries: 2, retry_base_delay: Duration::from_millis(1) },
    )
}

fn env() -> RunEnv {
    RunEnv { hooks: Arc::new(NoopHooks), cancel: CancellationToken::new(), sub_workflows: None }
}

fn register(types: &mut NodeTypes, node: MockNode) -> Arc<MockNode> {
    let node = Arc::new(node);
    types.register(node.name.clone(), format!("test://{}", node.name), node.clone());
    node
}

/// Records hook calls in order.
#[derive(Default)]
struct RecordingHooks(Mutex<Vec<String>>);

impl RecordingHooks {
    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionHooks for RecordingHooks {
    async fn workflow_execute_before(&self) {
        self.0.lock().unwrap().push("workflow:before".into());
    }
    async fn node_execute_before(&self, node: &str) {
        self.0.lock().unwrap().push(format!("{node}:before"));
    }
    async fn node_execute_after(&self, node: &str, _run: &NodeRun) {
        self.0.lock().unwrap().push(format!("{node}:after"));
    }
    async fn workflow_execute_after(&self, _result: &ExecutionResult) {
        self.0.lock().unwrap().push("workflow:after".into());
    }
    async fn send_message_to_ui(&self, payload: Value) {
        self.0.lock().unwrap().push(format!("ui:{payload}"));
    }
}

/// Bumps a counter in static data and pings the UI.
struct CounterNode;

#[async_trait]
impl ExecutableNode for CounterNode {
    async fn execute(
        &self,
        _parameters: &Value,
        input: Vec<Value>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Value>, NodeError> {
        let seen = ctx.static_data.get().get("seen").and_then(Value::as_u64).unwrap_or(0);
        ctx.static_data.set(json!({ "seen": seen + 1 }));
        if let Some(ui) = &ctx.ui {
            ui.send_message_to_ui(json!("counted")).await;
        }
        Ok(input)
    }
}

// ---------------------------------------------------------------------------
// DAG validation
// ---------------------------------------------------------------------------

#[test]
fn linear_workflow_validates_and_sorts() {
    let wf = linear_workflow(&["step_a", "step_b", "step_c"]);
    assert_eq!(validate_dag(&wf).unwrap(), vec!["step_a", "step_b", "step_c"]);
}

#[test]
fn cyclic_workflow_is_rejected() {
    let wf = linear_workflow(&["a", "b"]).connect("b", "a");
    assert_eq!(validate_dag(&wf), Err(EngineError::CycleDetected));
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linear_pipeline_feeds_parent_output_downstream() {
    let mut types = NodeTypes::new();
    register(&mut types, MockNode::returning("a", json!({ "x": 1 })));
    let b = register(&mut types, MockNode::returning("b", json!({ "y": 2 })));

    let mut req = request(linear_workflow(&["a", "b"]));
    req.trigger_input = vec![json!({ "body": "hi" })];
    let result = executor(types).run(&req, env()).await;

    assert!(result.finished);
    assert!(result.error().is_none());
    assert_eq!(result.result_data.last_node_executed.as_deref(), Some("b"));
    assert_eq!(b.calls.lock().unwrap()[0], vec![json!({ "node": "a", "x": 1 })]);
    assert_eq!(result.last_output(), Some(&[json!({ "node": "b", "y": 2 })][..]));
    assert!(result.stopped_at.is_some());
}

#[tokio::test]
async fn fatal_error_stops_the_run() {
    let mut types = NodeTypes::new();
    register(&mut types, MockNode::failing_fatal("a", "bad input"));
    let b = register(&mut types, MockNode::returning("b", json!({})));

    let result = executor(types).run(&request(linear_workflow(&["a", "b"])), env()).await;

    assert!(!result.finished);
    let err = result.error().unwrap();
    assert_eq!(err.node.as_deref(), Some("a"));
    assert!(err.message.contains("bad input"));
    assert_eq!(b.call_count(), 0);
    assert_eq!(result.result_data.run_data["a"][0].error.as_ref(), Some(err));
}

#[tokio::test]
async fn flaky_node_recovers_within_retry_budget() {
    let mut types = NodeTypes::new();
    let a = register(&mut types, MockNode::flaky("a", 2, json!({ "ok": true })));

    let result = executor(types).run(&request(linear_workflow(&["a"])), env()).await;

    assert!(result.finished);
    assert_eq!(a.call_count(), 3);
}

#[tokio::test]
async fn retries_are_exhausted() {
    let mut types = NodeTypes::new();
    let a = register(&mut types, MockNode::failing_retryable("a", "upstream 503"));

    let result = executor(types).run(&request(linear_workflow(&["a"])), env()).await;

    assert!(!result.finished);
    assert_eq!(a.call_count(), 3);
    assert!(result.error().unwrap().message.contains("upstream 503"));
}

#[tokio::test]
async fn unknown_node_type_fails_at_that_node() {
    let wf = Workflow::new("wf", "wf", vec![Node::new("ghost", "doesNotExist", Value::Null)]);
    let result = executor(NodeTypes::new()).run(&request(wf), env()).await;

    let err = result.error().unwrap();
    assert_eq!(err.name, "NodeTypeError");
    assert_eq!(err.node.as_deref(), Some("ghost"));
}

#[tokio::test]
async fn cycle_is_reported_as_validation_error() {
    let wf = linear_workflow(&["a", "b"]).connect("b", "a");
    let result = executor(NodeTypes::new()).run(&request(wf), env()).await;
    assert_eq!(result.error().unwrap().name, "WorkflowValidationError");
    assert!(!result.finished);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_running_node() {
    let mut types = NodeTypes::new();
    register(&mut types, MockNode::sleeping("a", Duration::from_secs(60), json!({})));
    let b = register(&mut types, MockNode::returning("b", json!({})));

    let run_env = env();
    let cancel = run_env.cancel.clone();
    let exec = executor(types);
    let req = request(linear_workflow(&["a", "b"]));
    let handle = tokio::spawn(async move { exec.run(&req, run_env).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    let result = handle.await.unwrap();

    assert!(!result.finished);
    assert!(result.error().is_none());
    assert!(!result.result_data.run_data.contains_key("a"));
    assert_eq!(b.call_count(), 0);
}

#[tokio::test]
async fn destination_node_limits_the_run() {
    let mut types = NodeTypes::new();
    register(&mut types, MockNode::returning("a", json!({})));
    register(&mut types, MockNode::returning("b", json!({})));
    let c = register(&mut types, MockNode::returning("c", json!({})));

    let mut req = request(linear_workflow(&["a", "b", "c"]));
    req.destination_node = Some("b".into());
    let result = executor(types).run(&req, env()).await;

    assert!(result.finished);
    assert_eq!(result.result_data.last_node_executed.as_deref(), Some("b"));
    assert_eq!(c.call_count(), 0);
}

#[tokio::test]
async fn existing_run_data_is_reused_not_reexecuted() {
    let mut types = NodeTypes::new();
    let a = register(&mut types, MockNode::returning("a", json!({})));
    let b = register(&mut types, MockNode::returning("b", json!({})));

    let previous = NodeRun {
        start_time: chrono::Utc::now(),
        execution_time_ms: 3,
        output: vec![json!({ "cached": true })],
        error: None,
    };
    let mut req = request(linear_workflow(&["a", "b"]));
    req.start_nodes = vec!["b".into()];
    req.trigger_input = vec![json!({ "cached": true })];
    req.run_data = Some(BTreeMap::from([("a".to_string(), vec![previous])]));

    let result = executor(types).run(&req, env()).await;

    assert!(result.finished);
    assert_eq!(a.call_count(), 0);
    assert_eq!(b.calls.lock().unwrap()[0], vec![json!({ "cached": true })]);
    assert_eq!(result.result_data.run_data["a"].len(), 1);
}

#[tokio::test]
async fn disabled_node_passes_items_through() {
    let mut types = NodeTypes::new();
    register(&mut types, MockNode::returning("a", json!({ "v": 1 })));
    let b = register(&mut types, MockNode::failing_fatal("b", "should not run"));
    register(&mut types, MockNode::returning("c", json!({})));

    let mut wf = linear_workflow(&["a", "b", "c"]);
    wf.nodes[1].disabled = true;
    let result = executor(types).run(&request(wf), env()).await;

    assert!(result.finished);
    assert_eq!(b.call_count(), 0);
    assert_eq!(result.result_data.run_data["b"][0].output, vec![json!({ "node": "a", "v": 1 })]);
}

#[tokio::test]
async fn changed_static_data_is_returned_and_hooks_fire_in_order() {
    let mut types = NodeTypes::new();
    types.register("counter", "test://counter", Arc::new(CounterNode));

    let mut wf = Workflow::new("wf", "wf", vec![Node::new("count", "counter", Value::Null)]);
    wf.static_data = json!({ "seen": 4 });

    let hooks = Arc::new(RecordingHooks::default());
    let run_env = RunEnv {
        hooks: hooks.clone(),
        cancel: CancellationToken::new(),
        sub_workflows: None,
    };
    let result = executor(types).run(&request(wf), run_env).await;

    assert_eq!(result.static_data, Some(json!({ "seen": 5 })));
    assert_eq!(
        hooks.events(),
        vec![
            "workflow:before",
            "count:before",
            "ui:\"counted\"",
            "count:after",
            "workflow:after",
        ]
    );
}

#[tokio::test]
async fn unchanged_static_data_is_not_returned() {
    let mut types = NodeTypes::new();
    register(&mut types, MockNode::returning("a", json!({})));
    let result = executor(types).run(&request(linear_workflow(&["a"])), env()).await;
    assert_eq!(result.static_data, None);
}

//! Worker side of the execution protocol.
//!
//! A worker runs exactly one top-level execution:
//!
//! 1. announce itself with `start`,
//! 2. wait for `startWorkflow` and check the node types it names,
//! 3. run the workflow, forwarding lifecycle hooks as messages,
//! 4. broker nested executions (`startExecution` → `executionId` →
//!    `finishExecution`) while reacting to `stopExecution` / `timeout`,
//! 5. let nested runs drain, each with its own `finishExecution`,
//! 6. send exactly one terminal message and return.
//!
//! When `timeout` and `stopExecution` both arrive, timeout wins no matter
//! the order; the reason never downgrades once set.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use engine::{
    ExecutionError, ExecutionHooks, ExecutionId, ExecutionMode, ExecutionRequest, ExecutionResult,
    ExecutorConfig, NodeRun, NoopHooks, RunEnv, Workflow, WorkflowExecutor,
};
use nodes::{NodeError, NodeTypes, SubWorkflowRunner};

use crate::channel::{self, WorkerSide};
use crate::protocol::{NestedRunRequest, ProcessError, SupervisorMessage, WorkerMessage};
use crate::{ProtocolViolation, WorkerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Stop,
    Timeout,
}

fn escalate(current: Option<StopReason>, incoming: StopReason) -> Option<StopReason> {
    match current {
        Some(StopReason::Timeout) => current,
        _ => Some(incoming),
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Worker {
    executor: WorkflowExecutor,
}

impl Worker {
    pub fn new(node_types: NodeTypes, config: ExecutorConfig) -> Self {
        Self { executor: WorkflowExecutor::new(node_types, config) }
    }

    /// Serve one execution over `channel`.
    #[instrument(skip_all)]
    pub async fn serve(&self, mut channel: WorkerSide) -> Result<(), WorkerError> {
        channel.send(WorkerMessage::Start)?;

        let start = loop {
            match channel.recv().await {
                Some(Ok(SupervisorMessage::StartWorkflow(start))) => break start,
                Some(Ok(other)) => warn!("ignoring {other:?} received before startWorkflow"),
                Some(Err(v)) => error!("protocol violation before startWorkflow: {v}"),
                None => return Err(ProtocolViolation::ChannelClosed.into()),
            }
        };

        let terminal = Terminal::new(channel.tx.clone());
        let request = start.request;
        info!(
            execution_id = %request.execution_id,
            workflow_id = %request.workflow_data.id,
            mode = request.execution_mode.as_str(),
            "worker received workflow"
        );

        let missing: Vec<&str> = start
            .node_types
            .iter()
            .map(|t| t.type_name.as_str())
            .filter(|t| !self.executor.node_types().contains(t))
            .collect();
        if !missing.is_empty() {
            error!("worker cannot load node types: {}", missing.join(", "));
            terminal.send(WorkerMessage::ProcessError(ProcessError::new(
                "NodeTypeError",
                format!("unknown node types: {}", missing.join(", ")),
            )))?;
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let calls = Arc::new(NestedCalls::new(channel.tx.clone()));
        let nested = NestedRunner {
            calls: calls.clone(),
            executor: self.executor.clone(),
            cancel: cancel.clone(),
            mode: request.execution_mode,
            credentials: request.credentials.clone(),
        };
        let env = RunEnv {
            hooks: Arc::new(ForwardingHooks { tx: channel.tx.clone() }),
            cancel: cancel.clone(),
            sub_workflows: Some(Arc::new(nested)),
        };

        let executor = self.executor.clone();
        let mut run = tokio::spawn(async move { executor.run(&request, env).await });

        let mut reason: Option<StopReason> = None;
        let mut inbound_open = true;
        let outcome = loop {
            tokio::select! {
                biased;
                msg = channel.recv(), if inbound_open => {
                    inbound_open = on_inbound(msg, &calls, &cancel, &mut reason);
                }
                joined = &mut run => break joined,
            }
        };

        // Nested runs cut off by cancellation still report their partial
        // results before the terminal message.
        cancel.cancel();
        calls.tracker.close();
        loop {
            tokio::select! {
                biased;
                msg = channel.recv(), if inbound_open => {
                    inbound_open = on_inbound(msg, &calls, &cancel, &mut reason);
                }
                _ = calls.tracker.wait() => break,
            }
        }

        let message = match outcome {
            Err(e) => WorkerMessage::ProcessError(join_failure(e)),
            Ok(result) => terminal_message(result, reason),
        };
        debug!("sending terminal '{}'", message.kind());
        terminal.send(message)?;
        Ok(())
    }
}

/// Applies one supervisor message; returns whether the inbound side is
/// still open.
fn on_inbound(
    msg: Option<Result<SupervisorMessage, ProtocolViolation>>,
    calls: &NestedCalls,
    cancel: &CancellationToken,
    reason: &mut Option<StopReason>,
) -> bool {
    match msg {
        Some(Ok(SupervisorMessage::ExecutionId { execution_id })) => calls.resolve(execution_id),
        Some(Ok(SupervisorMessage::StopExecution)) => {
            info!("stop requested");
            *reason = escalate(*reason, StopReason::Stop);
            cancel.cancel();
        }
        Some(Ok(SupervisorMessage::Timeout)) => {
            warn!("execution timed out, cancelling");
            *reason = escalate(*reason, StopReason::Timeout);
            cancel.cancel();
        }
        Some(Ok(SupervisorMessage::StartWorkflow(_))) => {
            error!("{}", ProtocolViolation::Unexpected("startWorkflow"));
        }
        Some(Err(v)) => error!("protocol violation: {v}"),
        None => {
            warn!("supervisor channel closed, cancelling run");
            calls.close();
            cancel.cancel();
            return false;
        }
    }
    true
}

fn terminal_message(mut result: ExecutionResult, reason: Option<StopReason>) -> WorkerMessage {
    match reason {
        Some(StopReason::Timeout) => {
            result.finished = false;
            result.result_data.error = Some(ExecutionError::timed_out());
            WorkerMessage::Timeout { result }
        }
        Some(StopReason::Stop) => {
            result.finished = true;
            result.result_data.error = None;
            WorkerMessage::End { result }
        }
        None => WorkerMessage::End { result },
    }
}

fn join_failure(e: JoinError) -> ProcessError {
    if !e.is_panic() {
        return ProcessError::new("WorkerError", "execution task was aborted");
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "execution panicked".to_owned());
    error!("execution panicked: {message}");
    ProcessError::new("WorkerPanic", message)
}

/// Serve one execution over this process's stdin/stdout.
pub async fn run_stdio(worker: Worker) -> Result<(), WorkerError> {
    let (channel, writer) = channel::json_lines(tokio::io::stdin(), tokio::io::stdout());
    let served = worker.serve(channel).await;
    writer.await.map_err(|e| WorkerError::Io(std::io::Error::other(e)))?;
    served
}

// ---------------------------------------------------------------------------
// Terminal message guard
// ---------------------------------------------------------------------------

/// Sends the run's single terminal message. Dropping it unsent reports a
/// `processError`, so the supervisor never waits on a silent worker.
struct Terminal {
    tx: Option<mpsc::UnboundedSender<WorkerMessage>>,
}

impl Terminal {
    fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { tx: Some(tx) }
    }

    fn send(mut self, msg: WorkerMessage) -> Result<(), ProtocolViolation> {
        debug_assert!(msg.is_terminal());
        match self.tx.take() {
            Some(tx) => tx.send(msg).map_err(|_| ProtocolViolation::ChannelClosed),
            None => Err(ProtocolViolation::Unexpected("second terminal message")),
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(WorkerMessage::ProcessError(ProcessError::new(
                "WorkerError",
                "worker stopped before producing a result",
            )));
        }
    }
}

// ---------------------------------------------------------------------------
// Hook forwarding
// ---------------------------------------------------------------------------

struct ForwardingHooks {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl ForwardingHooks {
    fn forward(&self, msg: WorkerMessage) {
        if self.tx.send(msg).is_err() {
            debug!("supervisor gone, dropping hook message");
        }
    }
}

#[async_trait]
impl ExecutionHooks for ForwardingHooks {
    async fn workflow_execute_before(&self) {
        self.forward(WorkerMessage::WorkflowExecuteBefore);
    }

    async fn node_execute_before(&self, node: &str) {
        self.forward(WorkerMessage::NodeExecuteBefore { node_name: node.to_owned() });
    }

    async fn node_execute_after(&self, node: &str, run: &NodeRun) {
        self.forward(WorkerMessage::NodeExecuteAfter { node_name: node.to_owned(), data: run.clone() });
    }

    async fn workflow_execute_after(&self, result: &ExecutionResult) {
        self.forward(WorkerMessage::WorkflowExecuteAfter { result: result.clone() });
    }

    async fn send_message_to_ui(&self, payload: Value) {
        self.forward(WorkerMessage::SendMessageToUi { payload });
    }
}

// ---------------------------------------------------------------------------
// Nested executions
// ---------------------------------------------------------------------------

/// Outstanding `startExecution` requests, answered strictly in send order,
/// plus the tasks running nested executions.
struct NestedCalls {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    /// `None` once the supervisor can no longer answer.
    pending: Mutex<Option<VecDeque<oneshot::Sender<ExecutionId>>>>,
    tracker: TaskTracker,
}

impl NestedCalls {
    fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { tx, pending: Mutex::new(Some(VecDeque::new())), tracker: TaskTracker::new() }
    }

    fn pending(&self) -> MutexGuard<'_, Option<VecDeque<oneshot::Sender<ExecutionId>>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn request_id(&self, request: NestedRunRequest) -> Result<ExecutionId, ProtocolViolation> {
        let (tx, rx) = oneshot::channel();
        {
            // Queue position and send order must agree.
            let mut guard = self.pending();
            let Some(pending) = guard.as_mut() else {
                return Err(ProtocolViolation::ChannelClosed);
            };
            pending.push_back(tx);
            if self.tx.send(WorkerMessage::StartExecution(request)).is_err() {
                pending.pop_back();
                return Err(ProtocolViolation::ChannelClosed);
            }
        }
        rx.await.map_err(|_| ProtocolViolation::ChannelClosed)
    }

    fn resolve(&self, execution_id: ExecutionId) {
        match self.pending().as_mut().and_then(VecDeque::pop_front) {
            Some(waiter) => {
                if waiter.send(execution_id).is_err() {
                    debug!("nested caller went away before its execution id arrived");
                }
            }
            None => error!("{}", ProtocolViolation::Unexpected("executionId")),
        }
    }

    /// Fails every waiting and future id request.
    fn close(&self) {
        self.pending().take();
    }

    fn finish(&self, execution_id: ExecutionId, result: ExecutionResult) {
        let msg = WorkerMessage::FinishExecution { execution_id, result: Some(result) };
        if self.tx.send(msg).is_err() {
            debug!("supervisor gone, dropping finishExecution");
        }
    }
}

#[derive(Clone)]
struct NestedRunner {
    calls: Arc<NestedCalls>,
    executor: WorkflowExecutor,
    cancel: CancellationToken,
    mode: ExecutionMode,
    credentials: HashMap<String, Value>,
}

impl NestedRunner {
    /// One nested execution: obtain an id, run, report. Every id handed out
    /// is answered with `finishExecution`, partial when cancelled.
    async fn run_nested(self, workflow: Workflow, input: Vec<Value>) -> Result<Vec<Value>, NodeError> {
        let request = NestedRunRequest { workflow_data: workflow.clone(), input: input.clone() };
        let execution_id = self
            .calls
            .request_id(request)
            .await
            .map_err(|e| NodeError::Fatal(e.to_string()))?;
        info!(%execution_id, workflow_id = %workflow.id, "running nested execution");

        let request = ExecutionRequest {
            execution_id: execution_id.clone(),
            workflow_data: workflow,
            credentials: self.credentials.clone(),
            execution_mode: self.mode,
            start_nodes: Vec::new(),
            destination_node: None,
            run_data: None,
            retry_of: None,
            session_id: None,
            trigger_input: input,
        };
        let env = RunEnv {
            hooks: Arc::new(NoopHooks),
            cancel: self.cancel.child_token(),
            sub_workflows: Some(Arc::new(self.clone())),
        };
        let result = self.executor.run(&request, env).await;
        self.calls.finish(execution_id, result.clone());

        if let Some(e) = result.error() {
            return Err(NodeError::Fatal(format!("sub-workflow failed: {}", e.message)));
        }
        if !result.finished {
            return Err(NodeError::Fatal("sub-workflow was cancelled".into()));
        }
        Ok(result.last_output().map(<[Value]>::to_vec).unwrap_or_default())
    }
}

#[async_trait]
impl SubWorkflowRunner for NestedRunner {
    async fn run_workflow(&self, definition: Value, input: Vec<Value>) -> Result<Vec<Value>, NodeError> {
        let workflow: Workflow = serde_json::from_value(definition)
            .map_err(|e| NodeError::Fatal(format!("invalid sub-workflow definition: {e}")))?;

        // Runs on its own task so that the calling node being dropped on
        // cancellation does not drop the nested run with it.
        let task = self.calls.tracker.spawn(self.clone().run_nested(workflow, input));
        task.await
            .map_err(|e| NodeError::Fatal(format!("nested execution task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use engine::Node;
    use nodes::mock::MockNode;
    use nodes::{ExecutableNode, ExecutionContext, NodeTypeInfo};
    use serde_json::json;

    use crate::channel::SupervisorSide;
    use crate::protocol::StartWorkflow;

    fn request(workflow: Workflow) -> ExecutionRequest {
        ExecutionRequest {
            execution_id: "1".into(),
            workflow_data: workflow,
            credentials: HashMap::new(),
            execution_mode: ExecutionMode::Manual,
            start_nodes: Vec::new(),
            destination_node: None,
            run_data: None,
            retry_of: None,
            session_id: None,
            trigger_input: Vec::new(),
        }
    }

    fn start(workflow: Workflow) -> SupervisorMessage {
        SupervisorMessage::StartWorkflow(StartWorkflow {
            request: request(workflow),
            node_types: Vec::new(),
            credential_types: Vec::new(),
        })
    }

    fn spawn_worker(types: NodeTypes) -> SupervisorSide {
        let (supervisor, worker_side) = channel::pair();
        let worker = Worker::new(
            types,
            ExecutorConfig { max_retries: 0, retry_base_delay: Duration::from_millis(1) },
        );
        tokio::spawn(async move { worker.serve(worker_side).await });
        supervisor
    }

    async fn drain(side: &mut SupervisorSide) -> Vec<WorkerMessage> {
        let mut out = Vec::new();
        while let Some(msg) = side.recv().await {
            out.push(msg.unwrap());
        }
        out
    }

    fn terminals(messages: &[WorkerMessage]) -> Vec<&WorkerMessage> {
        messages.iter().filter(|m| m.is_terminal()).collect()
    }

    fn sleeper_types() -> (NodeTypes, Workflow) {
        let mut types = NodeTypes::new();
        types.register(
            "slow",
            "test://slow",
            Arc::new(MockNode::sleeping("slow", Duration::from_secs(60), json!({}))),
        );
        let wf = Workflow::new("wf", "wf", vec![Node::new("slow", "slow", Value::Null)]);
        (types, wf)
    }

    #[tokio::test]
    async fn normal_run_forwards_hooks_and_ends_once() {
        let mut types = NodeTypes::new();
        types.register("a", "test://a", Arc::new(MockNode::returning("a", json!({ "v": 1 }))));
        let wf = Workflow::new("wf", "wf", vec![Node::new("a", "a", Value::Null)]);

        let mut sup = spawn_worker(types);
        sup.send(start(wf)).unwrap();
        let messages = drain(&mut sup).await;

        let kinds: Vec<&str> = messages.iter().map(WorkerMessage::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "start",
                "workflowExecuteBefore",
                "nodeExecuteBefore",
                "nodeExecuteAfter",
                "workflowExecuteAfter",
                "end",
            ]
        );
        match messages.last() {
            Some(WorkerMessage::End { result }) => assert!(result.finished),
            other => panic!("unexpected terminal: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_finished_without_error() {
        let (types, wf) = sleeper_types();
        let mut sup = spawn_worker(types);
        sup.send(start(wf)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        sup.send(SupervisorMessage::StopExecution).unwrap();

        let messages = drain(&mut sup).await;
        let terminal = terminals(&messages);
        assert_eq!(terminal.len(), 1);
        match terminal[0] {
            WorkerMessage::End { result } => {
                assert!(result.finished);
                assert!(result.error().is_none());
            }
            other => panic!("unexpected terminal: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_wins_over_stop_in_either_order() {
        for order in [
            [SupervisorMessage::Timeout, SupervisorMessage::StopExecution],
            [SupervisorMessage::StopExecution, SupervisorMessage::Timeout],
        ] {
            let (types, wf) = sleeper_types();
            let mut sup = spawn_worker(types);
            sup.send(start(wf)).unwrap();
            for msg in order {
                sup.send(msg).unwrap();
            }

            let messages = drain(&mut sup).await;
            let terminal = terminals(&messages);
            assert_eq!(terminal.len(), 1);
            match terminal[0] {
                WorkerMessage::Timeout { result } => {
                    assert!(!result.finished);
                    assert_eq!(result.error().map(|e| e.name.as_str()), Some("RunnerTimeout"));
                }
                other => panic!("unexpected terminal: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unknown_node_type_metadata_is_a_process_error() {
        let wf = Workflow::new("wf", "wf", vec![Node::new("a", "exotic", Value::Null)]);
        let mut sup = spawn_worker(NodeTypes::new());
        sup.send(SupervisorMessage::StartWorkflow(StartWorkflow {
            request: request(wf),
            node_types: vec![NodeTypeInfo {
                type_name: "exotic".into(),
                source_path: "plugins/exotic".into(),
            }],
            credential_types: Vec::new(),
        }))
        .unwrap();

        let messages = drain(&mut sup).await;
        let terminal = terminals(&messages);
        assert_eq!(terminal.len(), 1);
        assert!(matches!(terminal[0], WorkerMessage::ProcessError(e) if e.name == "NodeTypeError"));
    }

    struct PanickingNode;

    #[async_trait]
    impl ExecutableNode for PanickingNode {
        async fn execute(
            &self,
            _parameters: &Value,
            _input: Vec<Value>,
            _ctx: &ExecutionContext,
        ) -> Result<Vec<Value>, NodeError> {
            panic!("node blew up");
        }
    }

    #[tokio::test]
    async fn panic_is_reported_as_process_error() {
        let mut types = NodeTypes::new();
        types.register("boom", "test://boom", Arc::new(PanickingNode));
        let wf = Workflow::new("wf", "wf", vec![Node::new("boom", "boom", Value::Null)]);

        let mut sup = spawn_worker(types);
        sup.send(start(wf)).unwrap();
        let messages = drain(&mut sup).await;
        let terminal = terminals(&messages);
        assert_eq!(terminal.len(), 1);
        assert!(matches!(
            terminal[0],
            WorkerMessage::ProcessError(e) if e.name == "WorkerPanic" && e.message.contains("blew up")
        ));
    }

    /// Runs both sub-workflows in its parameters concurrently.
    struct FanOutNode;

    #[async_trait]
    impl ExecutableNode for FanOutNode {
        async fn execute(
            &self,
            parameters: &Value,
            _input: Vec<Value>,
            ctx: &ExecutionContext,
        ) -> Result<Vec<Value>, NodeError> {
            let runner = ctx.sub_workflows.clone().ok_or_else(|| NodeError::Fatal("no runner".into()))?;
            let (first, second) = tokio::join!(
                runner.run_workflow(parameters["first"].clone(), Vec::new()),
                runner.run_workflow(parameters["second"].clone(), Vec::new()),
            );
            Ok(first?.into_iter().chain(second?).collect())
        }
    }

    fn tagged(id: &str) -> Value {
        let wf = Workflow::new(
            id,
            id,
            vec![Node::new("tag", "set", json!({ "values": { "from": id } }))],
        );
        serde_json::to_value(wf).unwrap()
    }

    #[tokio::test]
    async fn nested_ids_are_matched_in_request_order() {
        let mut types = NodeTypes::with_builtins();
        types.register("fanOut", "test://fan-out", Arc::new(FanOutNode));
        let wf = Workflow::new(
            "parent",
            "parent",
            vec![Node::new("fan", "fanOut", json!({ "first": tagged("A"), "second": tagged("B") }))],
        );

        let mut sup = spawn_worker(types);
        sup.send(start(wf)).unwrap();

        // Both requests arrive before any id is handed out.
        let mut requested = Vec::new();
        while requested.len() < 2 {
            match sup.recv().await.unwrap().unwrap() {
                WorkerMessage::StartExecution(req) => requested.push(req.workflow_data.id),
                _ => continue,
            }
        }
        assert_eq!(requested, vec!["A", "B"]);
        sup.send(SupervisorMessage::ExecutionId { execution_id: "10".into() }).unwrap();
        sup.send(SupervisorMessage::ExecutionId { execution_id: "11".into() }).unwrap();

        let messages = drain(&mut sup).await;
        let finished: HashMap<String, ExecutionResult> = messages
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::FinishExecution { execution_id, result } => {
                    Some((execution_id.clone(), result.clone().unwrap()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(finished["10"].last_output().unwrap()[0]["from"], "A");
        assert_eq!(finished["11"].last_output().unwrap()[0]["from"], "B");

        match messages.last() {
            Some(WorkerMessage::End { result }) => {
                assert!(result.finished);
                let out = result.last_output().unwrap();
                assert_eq!(out, &[json!({ "from": "A" }), json!({ "from": "B" })][..]);
            }
            other => panic!("unexpected terminal: {other:?}"),
        }
    }

    /// Parent calls a child that tags an item and then sleeps for a minute.
    fn nested_sleeper() -> (NodeTypes, Workflow) {
        let mut types = NodeTypes::with_builtins();
        types.register(
            "slow",
            "test://slow",
            Arc::new(MockNode::sleeping("slow", Duration::from_secs(60), json!({}))),
        );
        let child = Workflow::new(
            "child",
            "child",
            vec![
                Node::new("tag", "set", json!({ "values": { "tagged": true } })),
                Node::new("slow", "slow", Value::Null),
            ],
        )
        .connect("tag", "slow");
        let parent = Workflow::new(
            "parent",
            "parent",
            vec![Node::new(
                "call",
                "executeWorkflow",
                json!({ "workflow": serde_json::to_value(&child).unwrap() }),
            )],
        );
        (types, parent)
    }

    /// Starts the parent, hands out nested id "2", lets the child reach its
    /// slow node, then sends `interrupt`.
    async fn interrupt_nested_run(interrupt: SupervisorMessage) -> Vec<WorkerMessage> {
        let (types, parent) = nested_sleeper();
        let mut sup = spawn_worker(types);
        sup.send(start(parent)).unwrap();
        loop {
            if let WorkerMessage::StartExecution(req) = sup.recv().await.unwrap().unwrap() {
                assert_eq!(req.workflow_data.id, "child");
                break;
            }
        }
        sup.send(SupervisorMessage::ExecutionId { execution_id: "2".into() }).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        sup.send(interrupt).unwrap();
        drain(&mut sup).await
    }

    fn partial_child_result(messages: &[WorkerMessage]) -> (usize, ExecutionResult) {
        messages
            .iter()
            .enumerate()
            .find_map(|(i, m)| match m {
                WorkerMessage::FinishExecution { execution_id, result } if execution_id == "2" => {
                    Some((i, result.clone().unwrap()))
                }
                _ => None,
            })
            .expect("nested execution was not finished")
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drains_nested_run_with_its_partial_result() {
        let messages = interrupt_nested_run(SupervisorMessage::StopExecution).await;

        let (at, child) = partial_child_result(&messages);
        assert!(!child.finished);
        assert_eq!(child.result_data.run_data["tag"][0].output, vec![json!({ "tagged": true })]);
        assert!(!child.result_data.run_data.contains_key("slow"));

        let terminal = terminals(&messages);
        assert_eq!(terminal.len(), 1);
        assert!(matches!(terminal[0], WorkerMessage::End { result } if result.finished));
        assert!(at < messages.len() - 1, "finishExecution must precede the terminal message");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_drains_nested_run_before_timeout_terminal() {
        let messages = interrupt_nested_run(SupervisorMessage::Timeout).await;

        let (at, child) = partial_child_result(&messages);
        assert!(!child.finished);
        assert!(child.result_data.run_data.contains_key("tag"));

        match messages.last() {
            Some(WorkerMessage::Timeout { result }) => assert!(!result.finished),
            other => panic!("unexpected terminal: {other:?}"),
        }
        assert!(at < messages.len() - 1);
    }

    #[test]
    fn escalation_never_downgrades_a_timeout() {
        assert_eq!(escalate(None, StopReason::Stop), Some(StopReason::Stop));
        assert_eq!(escalate(Some(StopReason::Stop), StopReason::Timeout), Some(StopReason::Timeout));
        assert_eq!(escalate(Some(StopReason::Timeout), StopReason::Stop), Some(StopReason::Timeout));
    }
}

//! Workflow execution engine (runs inside a worker).
//!
//! `WorkflowExecutor` is the in-worker orchestrator:
//! 1. Plans the run (start nodes, destination node, resumable run data).
//! 2. Iterates through nodes in order, dispatching each via `ExecutableNode`.
//! 3. Feeds each node the concatenated output of its parents.
//! 4. Fires lifecycle hooks around every node and around the whole run.
//! 5. Handles `NodeError::Retryable` (up to `max_retries`) and stops the run
//!    on any other error.
//!
//! Cancellation is cooperative: the token is checked between nodes and
//! raced against the node that is currently running. A cancelled run still
//! returns a well-formed (unfinished) [`ExecutionResult`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use nodes::{
    ExecutableNode, ExecutionContext, NodeError, NodeTypes, StaticData, SubWorkflowRunner,
    UiMessageSink,
};

use crate::dag::execution_plan;
use crate::hooks::ExecutionHooks;
use crate::models::{ExecutionError, ExecutionRequest, ExecutionResult, NodeRun, RunData};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of times a retryable node failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Per-run collaborators handed to [`WorkflowExecutor::run`].
#[derive(Clone)]
pub struct RunEnv {
    pub hooks: Arc<dyn ExecutionHooks>,
    pub cancel: CancellationToken,
    pub sub_workflows: Option<Arc<dyn SubWorkflowRunner>>,
}

/// Routes node UI messages into the run's hooks.
struct HookUiSink(Arc<dyn ExecutionHooks>);

#[async_trait]
impl UiMessageSink for HookUiSink {
    async fn send_message_to_ui(&self, payload: Value) {
        self.0.send_message_to_ui(payload).await;
    }
}

enum Step {
    Output(Vec<Value>),
    Failed(ExecutionError),
    Cancelled,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator that runs a single workflow execution.
#[derive(Clone)]
pub struct WorkflowExecutor {
    node_types: NodeTypes,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(node_types: NodeTypes, config: ExecutorConfig) -> Self {
        Self { node_types, config }
    }

    pub fn node_types(&self) -> &NodeTypes {
        &self.node_types
    }

    /// Run the request to completion, error or cancellation.
    #[instrument(
        skip(self, request, env),
        fields(workflow_id = %request.workflow_data.id, execution_id = %request.execution_id)
    )]
    pub async fn run(&self, request: &ExecutionRequest, env: RunEnv) -> ExecutionResult {
        let workflow = &request.workflow_data;
        let mut result = ExecutionResult::new(request.execution_mode, Utc::now());

        env.hooks.workflow_execute_before().await;

        let plan = match execution_plan(
            workflow,
            &request.start_nodes,
            request.destination_node.as_deref(),
        ) {
            Ok(plan) => plan,
            Err(e) => {
                error!("workflow cannot be planned: {e}");
                result.result_data.error =
                    Some(ExecutionError::new("WorkflowValidationError", e.to_string()));
                return self.finish(result, &env).await;
            }
        };
        info!("executing {} nodes in order: {:?}", plan.order.len(), plan.order);

        let mut run_data: RunData = request.run_data.clone().unwrap_or_default();
        let static_data = StaticData::new(workflow.static_data.clone());
        let ui: Arc<dyn UiMessageSink> = Arc::new(HookUiSink(env.hooks.clone()));
        let mut cancelled = false;

        for name in &plan.order {
            if env.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let Some(node) = workflow.node(name) else { continue };
            let is_start = plan.start_nodes.contains(name);

            if !is_start && run_data.contains_key(name) {
                debug!("node '{}' already has run data, reusing it", name);
                result.result_data.last_node_executed = Some(name.clone());
                continue;
            }

            let input: Vec<Value> = if is_start {
                request.trigger_input.clone()
            } else {
                workflow
                    .parents(name)
                    .into_iter()
                    .filter_map(|p| run_data.get(p).and_then(|runs| runs.last()))
                    .flat_map(|run| run.output.iter().cloned())
                    .collect()
            };

            env.hooks.node_execute_before(name).await;
            let start_time = Utc::now();
            let clock = Instant::now();

            let step = if node.disabled {
                Step::Output(input)
            } else {
                match self.node_types.get(&node.node_type) {
                    None => Step::Failed(
                        ExecutionError::new(
                            "NodeTypeError",
                            EngineError::UnknownNodeType {
                                node: name.clone(),
                                node_type: node.node_type.clone(),
                            }
                            .to_string(),
                        )
                        .at_node(name.clone()),
                    ),
                    Some(implementation) => {
                        let ctx = ExecutionContext {
                            workflow_id: workflow.id.clone(),
                            execution_id: request.execution_id.clone(),
                            node_name: name.clone(),
                            credentials: node
                                .credentials
                                .values()
                                .filter_map(|c| {
                                    request.credentials.get(c).map(|v| (c.clone(), v.clone()))
                                })
                                .collect(),
                            sub_workflows: env.sub_workflows.clone(),
                            ui: Some(ui.clone()),
                            static_data: static_data.clone(),
                        };
                        tokio::select! {
                            biased;
                            _ = env.cancel.cancelled() => Step::Cancelled,
                            out = self.execute_with_retry(
                                name, implementation.as_ref(), &node.parameters, input, &ctx,
                            ) => match out {
                                Ok(items) => Step::Output(items),
                                Err(e) => Step::Failed(e),
                            },
                        }
                    }
                }
            };

            let execution_time_ms = clock.elapsed().as_millis() as u64;
            let run = match step {
                Step::Cancelled => {
                    warn!("node '{}' interrupted by cancellation", name);
                    cancelled = true;
                    break;
                }
                Step::Output(output) => {
                    info!("node '{}' succeeded", name);
                    NodeRun { start_time, execution_time_ms, output, error: None }
                }
                Step::Failed(e) => {
                    error!("node '{}' failed: {}", name, e.message);
                    result.result_data.error = Some(e.clone());
                    NodeRun { start_time, execution_time_ms, output: Vec::new(), error: Some(e) }
                }
            };

            env.hooks.node_execute_after(name, &run).await;
            run_data.entry(name.clone()).or_default().push(run);
            result.result_data.last_node_executed = Some(name.clone());

            if result.result_data.error.is_some() {
                break;
            }
        }

        result.result_data.run_data = run_data;
        result.finished = !cancelled && result.result_data.error.is_none();

        let new_static = static_data.get();
        if new_static != workflow.static_data {
            result.static_data = Some(new_static);
        }

        self.finish(result, &env).await
    }

    async fn finish(&self, mut result: ExecutionResult, env: &RunEnv) -> ExecutionResult {
        result.stopped_at = Some(Utc::now());
        env.hooks.workflow_execute_after(&result).await;
        result
    }

    // -----------------------------------------------------------------------
    // Internal: execute a single node with retry logic.
    // -----------------------------------------------------------------------

    async fn execute_with_retry(
        &self,
        node_name: &str,
        node: &dyn ExecutableNode,
        parameters: &Value,
        input: Vec<Value>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Value>, ExecutionError> {
        let mut attempts = 0u32;

        loop {
            match node.execute(parameters, input.clone(), ctx).await {
                Ok(output) => return Ok(output),

                Err(NodeError::Retryable(msg)) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(ExecutionError::new("NodeOperationError", msg).at_node(node_name));
                    }

                    let delay = self.config.retry_base_delay * 2u32.pow(attempts.saturating_sub(1));

                    warn!(
                        "node '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        node_name, attempts, self.config.max_retries, delay, msg
                    );

                    tokio::time::sleep(delay).await;
                }

                Err(other) => {
                    return Err(ExecutionError::new("NodeOperationError", other.message())
                        .at_node(node_name));
                }
            }
        }
    }
}

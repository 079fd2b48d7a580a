//! Supervisor side of the execution protocol.
//!
//! The supervisor owns execution-id allocation and persistence. For every
//! run it launches a worker, sends `startWorkflow`, then services the
//! worker's messages until exactly one terminal message arrives (or the
//! worker has to be killed). It also enforces the execution deadline: on
//! expiry it sends `timeout`, and if the worker is still silent after the
//! grace period it is killed and a timeout result is synthesized.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use engine::{
    CredentialsResolver, ExecutionError, ExecutionId, ExecutionMode, ExecutionRequest,
    ExecutionResult, ExecutionStore, NewExecution, RunData, StoreError, Workflow,
    WorkflowSettings, WorkflowStore,
};
use nodes::{CredentialTypeInfo, NodeTypeInfo, NodeTypes};

use crate::active::ActiveExecutions;
use crate::launcher::{WorkerConnection, WorkerLauncher};
use crate::protocol::{NestedRunRequest, StartWorkflow, SupervisorMessage, WorkerMessage};
use crate::{ProtocolViolation, SupervisorError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Seconds, used when a workflow has no override. `-1` disables.
    pub execution_timeout: i64,
    /// Upper bound for any per-workflow timeout.
    pub max_execution_timeout: Duration,
    /// How long a worker may take to answer `timeout` before it is killed.
    pub timeout_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            execution_timeout: -1,
            max_execution_timeout: Duration::from_secs(3600),
            timeout_grace: Duration::from_secs(5),
        }
    }
}

impl SupervisorConfig {
    pub fn timeout_for(&self, settings: &WorkflowSettings) -> Option<Duration> {
        let secs = settings.execution_timeout.unwrap_or(self.execution_timeout);
        if secs <= 0 {
            return None;
        }
        Some(Duration::from_secs(secs as u64).min(self.max_execution_timeout))
    }
}

/// Receives `sendMessageToUI` payloads of manual runs.
pub trait UiSink: Send + Sync {
    fn send_to_ui(&self, session_id: &str, execution_id: &str, payload: Value);
}

/// Storage collaborators the supervisor persists through.
#[derive(Clone)]
pub struct Stores {
    pub workflows: Arc<dyn WorkflowStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub credentials: Arc<dyn CredentialsResolver>,
}

// ---------------------------------------------------------------------------
// Requests and handles
// ---------------------------------------------------------------------------

/// What a caller wants run. The supervisor turns it into an
/// [`ExecutionRequest`] once it has an execution id and credentials.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub workflow: Workflow,
    pub mode: ExecutionMode,
    pub start_nodes: Vec<String>,
    pub destination_node: Option<String>,
    pub run_data: Option<RunData>,
    pub retry_of: Option<ExecutionId>,
    pub session_id: Option<String>,
    pub trigger_input: Vec<Value>,
}

impl StartRequest {
    pub fn new(workflow: Workflow, mode: ExecutionMode) -> Self {
        Self {
            workflow,
            mode,
            start_nodes: Vec::new(),
            destination_node: None,
            run_data: None,
            retry_of: None,
            session_id: None,
            trigger_input: Vec::new(),
        }
    }

    pub fn starting_at(mut self, node: impl Into<String>) -> Self {
        self.start_nodes.push(node.into());
        self
    }

    pub fn with_input(mut self, items: Vec<Value>) -> Self {
        self.trigger_input = items;
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// A started execution. The id is known immediately; the result arrives
/// through [`ExecutionHandle::wait`].
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    result: oneshot::Receiver<ExecutionResult>,
    active: ActiveExecutions,
}

impl ExecutionHandle {
    pub fn stop(&self) -> bool {
        self.active.stop(&self.execution_id)
    }

    pub async fn wait(self) -> Result<ExecutionResult, SupervisorError> {
        self.result.await.map_err(|_| SupervisorError::ResultDropped(self.execution_id))
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Inner {
    launcher: Arc<dyn WorkerLauncher>,
    node_types: NodeTypes,
    stores: Stores,
    ui: Option<Arc<dyn UiSink>>,
    active: ActiveExecutions,
    config: SupervisorConfig,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        node_types: NodeTypes,
        stores: Stores,
        config: SupervisorConfig,
    ) -> Self {
        Self::with_ui(launcher, node_types, stores, config, None)
    }

    pub fn with_ui(
        launcher: Arc<dyn WorkerLauncher>,
        node_types: NodeTypes,
        stores: Stores,
        config: SupervisorConfig,
        ui: Option<Arc<dyn UiSink>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                launcher,
                node_types,
                stores,
                ui,
                active: ActiveExecutions::new(),
                config,
            }),
        }
    }

    pub fn active(&self) -> &ActiveExecutions {
        &self.inner.active
    }

    pub fn node_types(&self) -> &NodeTypes {
        &self.inner.node_types
    }

    /// Allocate an id, launch a worker and return without waiting.
    #[instrument(skip_all, fields(workflow_id = %start.workflow.id, mode = start.mode.as_str()))]
    pub async fn start(&self, start: StartRequest) -> Result<ExecutionHandle, SupervisorError> {
        let stores = &self.inner.stores;
        let credentials = stores.credentials.decrypt(&start.workflow).await?;
        let execution_id = stores
            .executions
            .create_execution(&NewExecution {
                workflow_id: start.workflow.id.clone(),
                mode: start.mode,
                retry_of: start.retry_of.clone(),
                parent: None,
            })
            .await?;

        let request = ExecutionRequest {
            execution_id: execution_id.clone(),
            workflow_data: start.workflow,
            credentials,
            execution_mode: start.mode,
            start_nodes: start.start_nodes,
            destination_node: start.destination_node,
            run_data: start.run_data,
            retry_of: start.retry_of,
            session_id: start.session_id,
            trigger_input: start.trigger_input,
        };

        let active = &self.inner.active;
        let stop = active.register(execution_id.clone(), request.workflow_data.id.clone(), None);
        let result = active
            .subscribe(&execution_id)
            .ok_or_else(|| SupervisorError::NotRunning(execution_id.clone()))?;
        info!(%execution_id, "execution started");

        let driver = self.clone();
        tokio::spawn(async move { driver.drive(request, stop).await });

        Ok(ExecutionHandle { execution_id, result, active: active.clone() })
    }

    /// Start and wait for the result.
    pub async fn run(&self, start: StartRequest) -> Result<ExecutionResult, SupervisorError> {
        self.start(start).await?.wait().await
    }

    pub fn stop(&self, execution_id: &str) -> Result<(), SupervisorError> {
        if self.inner.active.stop(execution_id) {
            Ok(())
        } else {
            Err(SupervisorError::NotRunning(execution_id.to_owned()))
        }
    }

    // -----------------------------------------------------------------------
    // Driving one execution
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(execution_id = %request.execution_id))]
    async fn drive(self, request: ExecutionRequest, stop: CancellationToken) {
        let started_at = Utc::now();
        let execution_id = request.execution_id.clone();
        let workflow_id = request.workflow_data.id.clone();
        let mode = request.execution_mode;

        let result = match self.inner.launcher.launch().await {
            Ok(connection) => self.converse(request, connection, stop, started_at).await,
            Err(e) => {
                error!("{e}");
                ExecutionResult::failed(
                    mode,
                    started_at,
                    ExecutionError::new("WorkerLaunchError", e.to_string()),
                )
            }
        };

        self.complete(&workflow_id, &execution_id, mode, started_at, result).await;
    }

    async fn converse(
        &self,
        request: ExecutionRequest,
        connection: WorkerConnection,
        stop: CancellationToken,
        started_at: DateTime<Utc>,
    ) -> ExecutionResult {
        let WorkerConnection { mut channel, mut handle } = connection;
        let execution_id = request.execution_id.clone();
        let mode = request.execution_mode;
        let session_id = request.session_id.clone();
        let config = &self.inner.config;
        let deadline = config.timeout_for(&request.workflow_data.settings).map(|t| Instant::now() + t);

        let (node_types, credential_types) = self.metadata(&request.workflow_data);
        let start = StartWorkflow { request, node_types, credential_types };
        if channel.send(SupervisorMessage::StartWorkflow(start)).is_err() {
            handle.kill().await;
            return violation_result(mode, started_at, ProtocolViolation::ChannelClosed);
        }

        let mut grace: Option<Instant> = None;
        let mut stop_sent = false;
        let mut run_data = RunData::new();

        let outcome: Result<ExecutionResult, ProtocolViolation> = loop {
            tokio::select! {
                msg = channel.recv() => match msg {
                    None => break Err(ProtocolViolation::ClosedWithoutTerminal),
                    Some(Err(v)) => break Err(v),
                    Some(Ok(msg)) => match msg {
                        WorkerMessage::Start => debug!("worker started"),
                        WorkerMessage::NodeExecuteBefore { node_name } => {
                            debug!(node = %node_name, "node started");
                        }
                        WorkerMessage::NodeExecuteAfter { node_name, data } => {
                            debug!(node = %node_name, ms = data.execution_time_ms, "node finished");
                            run_data.entry(node_name).or_default().push(data);
                        }
                        WorkerMessage::WorkflowExecuteBefore => debug!("workflow started"),
                        WorkerMessage::WorkflowExecuteAfter { .. } => debug!("workflow finished"),
                        WorkerMessage::SendMessageToUi { payload } => {
                            self.forward_ui(mode, session_id.as_deref(), &execution_id, payload);
                        }
                        WorkerMessage::StartExecution(nested) => {
                            match self.start_nested(&execution_id, mode, nested).await {
                                Ok(child) => {
                                    let reply = SupervisorMessage::ExecutionId { execution_id: child };
                                    if let Err(v) = channel.send(reply) {
                                        break Err(v);
                                    }
                                }
                                Err(e) => {
                                    error!("could not allocate a nested execution id: {e}");
                                    handle.kill().await;
                                    break Ok(ExecutionResult::failed(
                                        mode,
                                        started_at,
                                        ExecutionError::new("ExecutionIdAllocationError", e.to_string()),
                                    ));
                                }
                            }
                        }
                        WorkerMessage::FinishExecution { execution_id: child, result } => {
                            self.finish_nested(&child, mode, started_at, result).await;
                        }
                        WorkerMessage::End { result } => break Ok(result),
                        WorkerMessage::Timeout { result } => break Ok(result),
                        WorkerMessage::ProcessError(e) => {
                            error!(name = %e.name, "worker reported an error: {}", e.message);
                            break Ok(ExecutionResult::failed(mode, started_at, e.into()));
                        }
                    },
                },
                _ = sleep_until(deadline), if grace.is_none() => {
                    warn!("execution exceeded its deadline, sending timeout");
                    let _ = channel.send(SupervisorMessage::Timeout);
                    grace = Some(Instant::now() + config.timeout_grace);
                }
                _ = sleep_until(grace) => {
                    error!("worker ignored timeout for {:?}, killing it", config.timeout_grace);
                    handle.kill().await;
                    break Ok(ExecutionResult::timed_out(mode, started_at, run_data.clone()));
                }
                _ = stop.cancelled(), if !stop_sent => {
                    info!("stop requested");
                    stop_sent = true;
                    let _ = channel.send(SupervisorMessage::StopExecution);
                }
            }
        };
        drop(channel);

        match outcome {
            Ok(result) => {
                if tokio::time::timeout(config.timeout_grace, handle.reap()).await.is_err() {
                    warn!("worker did not exit after its terminal message");
                }
                result
            }
            Err(v) => {
                error!("protocol violation, killing worker: {v}");
                handle.kill().await;
                violation_result(mode, started_at, v)
            }
        }
    }

    /// Persist, release orphaned children, and publish the result.
    async fn complete(
        &self,
        workflow_id: &str,
        execution_id: &str,
        mode: ExecutionMode,
        started_at: DateTime<Utc>,
        result: ExecutionResult,
    ) {
        let active = &self.inner.active;
        for child in active.children_of(execution_id) {
            warn!(%child, "nested execution outlived its parent");
            self.finish_nested(&child, mode, started_at, None).await;
        }

        let stores = &self.inner.stores;
        if let Err(e) = stores.executions.finish_execution(execution_id, &result).await {
            warn!("failed to persist result of execution {execution_id}: {e}");
        }
        if let Some(static_data) = &result.static_data {
            if let Err(e) = stores.workflows.save_static_data(workflow_id, static_data).await {
                warn!("failed to persist static data of workflow {workflow_id}: {e}");
            }
        }

        info!(
            finished = result.finished,
            error = result.error().map(|e| e.name.as_str()).unwrap_or("-"),
            "execution completed"
        );
        active.finish(execution_id, &result);
    }

    async fn start_nested(
        &self,
        parent: &str,
        mode: ExecutionMode,
        nested: NestedRunRequest,
    ) -> Result<ExecutionId, StoreError> {
        let workflow_id = nested.workflow_data.id;
        let child = self
            .inner
            .stores
            .executions
            .create_execution(&NewExecution {
                workflow_id: workflow_id.clone(),
                mode,
                retry_of: None,
                parent: Some(parent.to_owned()),
            })
            .await?;
        self.inner.active.register(child.clone(), workflow_id, Some(parent.to_owned()));
        info!(%parent, %child, "allocated nested execution id");
        Ok(child)
    }

    async fn finish_nested(
        &self,
        execution_id: &str,
        mode: ExecutionMode,
        started_at: DateTime<Utc>,
        result: Option<ExecutionResult>,
    ) {
        let result = result.unwrap_or_else(|| {
            ExecutionResult::failed(
                mode,
                started_at,
                ExecutionError::new(
                    "ExecutionCancelled",
                    "the nested execution ended without a result",
                ),
            )
        });
        if let Err(e) = self.inner.stores.executions.finish_execution(execution_id, &result).await {
            warn!("failed to persist nested execution {execution_id}: {e}");
        }
        self.inner.active.finish(execution_id, &result);
    }

    fn forward_ui(
        &self,
        mode: ExecutionMode,
        session_id: Option<&str>,
        execution_id: &str,
        payload: Value,
    ) {
        match (mode, session_id, &self.inner.ui) {
            (ExecutionMode::Manual, Some(session), Some(ui)) => {
                ui.send_to_ui(session, execution_id, payload);
            }
            _ => debug!("dropping sendMessageToUI for {} run", mode.as_str()),
        }
    }

    fn metadata(&self, workflow: &Workflow) -> (Vec<NodeTypeInfo>, Vec<CredentialTypeInfo>) {
        let types: BTreeSet<&str> = workflow.nodes.iter().map(|n| n.node_type.as_str()).collect();
        let node_types = types
            .into_iter()
            .filter_map(|t| self.inner.node_types.resolve(t).map(|(_, info)| info))
            .collect();

        let credential_types: BTreeSet<&str> = workflow
            .nodes
            .iter()
            .flat_map(|n| n.credentials.keys().map(String::as_str))
            .collect();
        let credential_types = credential_types
            .into_iter()
            .filter_map(|c| self.inner.node_types.resolve_credential_type(c))
            .collect();

        (node_types, credential_types)
    }
}

fn violation_result(
    mode: ExecutionMode,
    started_at: DateTime<Utc>,
    violation: ProtocolViolation,
) -> ExecutionResult {
    ExecutionResult::failed(
        mode,
        started_at,
        ExecutionError::new("ProtocolViolation", violation.to_string()),
    )
}

/// Sleep until `at`, or forever when there is no deadline.
async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

//! Temporary webhooks for manually testing a workflow.
//!
//! Arming a workflow registers all of its webhooks in the test scope as one
//! group. The group is torn down as a whole when the first request hits any
//! of its keys, when an operator cancels it, or when the TTL runs out.
//! Different workflows can be armed on the same route; a request goes to
//! the one armed first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use engine::{ExecutionId, ExecutionMode, Workflow, WorkflowId};
use nodes::NodeTypes;
use runner::{StartRequest, Supervisor};

use crate::push::{Push, PushEvent};
use crate::registry::{collect_webhooks, WebhookRegistry, WebhookScope};
use crate::response::{respond, WebhookRequest, WebhookResponse};
use crate::WebhookError;

#[derive(Debug, Clone)]
pub struct TestWebhookConfig {
    /// How long an armed group waits for its first request.
    pub ttl: Duration,
}

impl Default for TestWebhookConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(120) }
    }
}

/// How an armed session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Fired { execution_id: ExecutionId },
    Expired,
    Cancelled,
}

pub enum ArmResult {
    /// The workflow declares no webhooks.
    NothingToTest,
    Armed(TestWebhookHandle),
}

pub struct TestWebhookHandle {
    pub workflow_id: WorkflowId,
    /// Paths the caller can hit below `/webhook-test/`.
    pub paths: Vec<String>,
    outcome: oneshot::Receiver<TestOutcome>,
}

impl TestWebhookHandle {
    pub async fn wait(self) -> TestOutcome {
        self.outcome.await.unwrap_or(TestOutcome::Cancelled)
    }
}

struct TestGroup {
    generation: u64,
    keys: Vec<String>,
    session_id: Option<String>,
    workflow: Workflow,
    timer: JoinHandle<()>,
    notify: oneshot::Sender<TestOutcome>,
}

struct Inner {
    registry: WebhookRegistry,
    node_types: NodeTypes,
    supervisor: Supervisor,
    push: Arc<dyn Push>,
    config: TestWebhookConfig,
    sessions: Mutex<HashMap<WorkflowId, TestGroup>>,
    generation: AtomicU64,
}

impl Inner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<WorkflowId, TestGroup>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deregister an expired or cancelled group that has already been taken
    /// out of the table.
    fn teardown(&self, workflow_id: &str, group: TestGroup, outcome: TestOutcome) {
        group.timer.abort();
        self.registry.remove_all(&group.keys);
        if let Some(session_id) = &group.session_id {
            self.push.push(
                session_id,
                PushEvent::TestWebhookDeleted { workflow_id: workflow_id.to_owned() },
            );
        }
        debug!(%workflow_id, ?outcome, "test webhooks removed");
        let _ = group.notify.send(outcome);
    }
}

#[derive(Clone)]
pub struct TestWebhooks {
    inner: Arc<Inner>,
}

impl TestWebhooks {
    pub fn new(
        registry: WebhookRegistry,
        node_types: NodeTypes,
        supervisor: Supervisor,
        push: Arc<dyn Push>,
        config: TestWebhookConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                node_types,
                supervisor,
                push,
                config,
                sessions: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &WebhookRegistry {
        &self.inner.registry
    }

    /// Register every webhook of `workflow` for one test request. A
    /// workflow already under test is cancelled first.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    pub fn arm(
        &self,
        workflow: Workflow,
        session_id: Option<String>,
    ) -> Result<ArmResult, WebhookError> {
        let registrations = collect_webhooks(&workflow, &self.inner.node_types, WebhookScope::Test);
        if registrations.is_empty() {
            return Ok(ArmResult::NothingToTest);
        }
        let paths = registrations.iter().map(|r| r.public_path()).collect();

        let mut sessions = self.inner.sessions();
        if let Some(previous) = sessions.remove(&workflow.id) {
            self.inner.teardown(&workflow.id, previous, TestOutcome::Cancelled);
        }

        let keys = self.inner.registry.add_all(registrations)?;

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let (notify, outcome) = oneshot::channel();
        let timer = tokio::spawn(expire(
            Arc::downgrade(&self.inner),
            workflow.id.clone(),
            generation,
            self.inner.config.ttl,
        ));

        let workflow_id = workflow.id.clone();
        info!(webhooks = keys.len(), ttl = ?self.inner.config.ttl, "test webhooks armed");
        sessions.insert(
            workflow_id.clone(),
            TestGroup { generation, keys, session_id, workflow, timer, notify },
        );
        Ok(ArmResult::Armed(TestWebhookHandle { workflow_id, paths, outcome }))
    }

    /// Cancel a workflow's test session. Returns whether one existed.
    pub fn cancel(&self, workflow_id: &str) -> bool {
        let group = self.inner.sessions().remove(workflow_id);
        match group {
            Some(group) => {
                self.inner.teardown(workflow_id, group, TestOutcome::Cancelled);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, workflow_id: &str) -> bool {
        self.inner.sessions().contains_key(workflow_id)
    }

    /// Serve a request hitting an armed group.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn execute_webhook(
        &self,
        request: WebhookRequest,
    ) -> Result<WebhookResponse, WebhookError> {
        let matches = self.inner.registry.find_all(WebhookScope::Test, request.method, &request.path)?;

        // Several workflows may be armed on one route; the earliest armed
        // group still holding the key takes the request.
        let (found, group) = {
            let mut sessions = self.inner.sessions();
            matches
                .into_iter()
                .find(|m| {
                    sessions
                        .get(&m.registration.workflow_id)
                        .is_some_and(|group| group.keys.contains(&m.key))
                })
                .and_then(|found| {
                    let group = sessions.remove(&found.registration.workflow_id)?;
                    Some((found, group))
                })
                .ok_or_else(|| WebhookError::Response {
                    status: 404,
                    message: format!("no test webhook session for \"{}\"", request.path),
                })?
        };
        let registration = found.registration;
        let workflow_id = registration.workflow_id.clone();

        group.timer.abort();
        self.inner.registry.remove_all(&group.keys);

        if group.workflow.node(&registration.node).is_none() {
            let _ = group.notify.send(TestOutcome::Cancelled);
            return Err(WebhookError::Response {
                status: 404,
                message: format!("could not find node \"{}\" to start the workflow", registration.node),
            });
        }

        let start = StartRequest::new(group.workflow, ExecutionMode::Manual)
            .starting_at(registration.node.clone())
            .with_input(vec![request.into_item(found.params)])
            .with_session(group.session_id.clone());
        let handle = self.inner.supervisor.start(start).await?;
        let execution_id = handle.execution_id.clone();

        if let Some(session_id) = &group.session_id {
            self.inner.push.push(
                session_id,
                PushEvent::TestWebhookReceived {
                    workflow_id: workflow_id.clone(),
                    execution_id: execution_id.clone(),
                },
            );
        }
        info!(%workflow_id, %execution_id, "test webhook fired");
        let _ = group.notify.send(TestOutcome::Fired { execution_id });

        respond(registration.response_mode, handle).await
    }
}

async fn expire(inner: Weak<Inner>, workflow_id: WorkflowId, generation: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let group = {
        let mut sessions = inner.sessions();
        match sessions.get(&workflow_id) {
            Some(group) if group.generation == generation => sessions.remove(&workflow_id),
            _ => None,
        }
    };
    if let Some(group) = group {
        info!(%workflow_id, "test webhooks expired");
        inner.teardown(&workflow_id, group, TestOutcome::Expired);
    }
}

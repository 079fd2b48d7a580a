//! Webhooks of persisted, activated workflows.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, instrument, warn};

use engine::{ExecutionMode, Workflow, WorkflowFilter, WorkflowId, WorkflowStore};
use nodes::NodeTypes;
use runner::{StartRequest, Supervisor};

use crate::registry::{collect_webhooks, WebhookRegistration, WebhookRegistry, WebhookScope};
use crate::response::{respond, WebhookRequest, WebhookResponse};
use crate::WebhookError;

/// Why a workflow is being activated. Only affects logging and whether
/// stale registrations are replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationMode {
    Init,
    Create,
    Update,
    Activate,
}

pub struct ActiveWorkflows {
    registry: WebhookRegistry,
    workflows: Arc<dyn WorkflowStore>,
    node_types: NodeTypes,
    supervisor: Supervisor,
    registered: DashMap<WorkflowId, Vec<String>>,
    errors: DashMap<WorkflowId, String>,
}

impl ActiveWorkflows {
    pub fn new(
        registry: WebhookRegistry,
        workflows: Arc<dyn WorkflowStore>,
        node_types: NodeTypes,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            registry,
            workflows,
            node_types,
            supervisor,
            registered: DashMap::new(),
            errors: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &WebhookRegistry {
        &self.registry
    }

    /// Activate every persisted active workflow. Failures are recorded per
    /// workflow and do not stop the others; returns how many activated.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<usize, WebhookError> {
        let workflows = self.workflows.find_many(&WorkflowFilter::active()).await?;
        let total = workflows.len();
        let mut activated = 0;
        for workflow in workflows {
            let id = workflow.id.clone();
            match self.activate(&workflow, ActivationMode::Init) {
                Ok(()) => activated += 1,
                Err(e) => warn!(workflow_id = %id, "activation failed: {e}"),
            }
        }
        info!("activated {activated} of {total} workflow(s)");
        Ok(activated)
    }

    #[instrument(skip(self))]
    pub async fn add(&self, workflow_id: &str, mode: ActivationMode) -> Result<(), WebhookError> {
        let workflow = match self.workflows.find_by_id(workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                let err = WebhookError::WorkflowNotFound(workflow_id.to_owned());
                self.errors.insert(workflow_id.to_owned(), err.to_string());
                return Err(err);
            }
            Err(e) => return Err(e.into()),
        };
        self.activate(&workflow, mode)
    }

    /// Register `workflow`'s webhooks. Re-activating swaps the old set for
    /// the new one; when the new set cannot be registered the old one is
    /// put back, so a failed update keeps the workflow reachable.
    fn activate(&self, workflow: &Workflow, mode: ActivationMode) -> Result<(), WebhookError> {
        if mode == ActivationMode::Init && self.registered.contains_key(&workflow.id) {
            return Ok(());
        }
        let previous: Vec<WebhookRegistration> = match self.registered.remove(&workflow.id) {
            Some((_, keys)) => keys.iter().filter_map(|key| self.registry.remove(key)).collect(),
            None => Vec::new(),
        };

        let registrations = collect_webhooks(workflow, &self.node_types, WebhookScope::Production);
        match self.registry.add_all(registrations) {
            Ok(keys) => {
                info!(workflow_id = %workflow.id, ?mode, webhooks = keys.len(), "workflow activated");
                self.registered.insert(workflow.id.clone(), keys);
                self.errors.remove(&workflow.id);
                Ok(())
            }
            Err(e) => {
                if !previous.is_empty() {
                    match self.registry.add_all(previous) {
                        Ok(keys) => {
                            warn!(workflow_id = %workflow.id, "update failed, previous webhooks kept");
                            self.registered.insert(workflow.id.clone(), keys);
                        }
                        Err(restore) => {
                            error!(workflow_id = %workflow.id, "previous webhooks lost: {restore}");
                        }
                    }
                }
                let reason = e.to_string();
                self.errors.insert(workflow.id.clone(), reason.clone());
                Err(WebhookError::ActivationFailed { workflow_id: workflow.id.clone(), reason })
            }
        }
    }

    /// Deregister a workflow's webhooks. No-op when it is not active.
    pub fn remove(&self, workflow_id: &str) {
        if let Some((_, keys)) = self.registered.remove(workflow_id) {
            self.registry.remove_all(&keys);
            info!(%workflow_id, "workflow deactivated");
        }
    }

    /// Deregister everything; used on shutdown.
    pub fn remove_all(&self) {
        for id in self.active_workflow_ids() {
            self.remove(&id);
        }
    }

    pub fn get_activation_error(&self, workflow_id: &str) -> Option<String> {
        self.errors.get(workflow_id).map(|e| e.value().clone())
    }

    pub fn is_active(&self, workflow_id: &str) -> bool {
        self.registered.contains_key(workflow_id)
    }

    pub fn active_workflow_ids(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<_> = self.registered.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Resolve a production webhook call and run its workflow.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn execute_webhook(
        &self,
        request: WebhookRequest,
    ) -> Result<WebhookResponse, WebhookError> {
        let found = self.registry.find(WebhookScope::Production, request.method, &request.path)?;
        let registration = found.registration;

        let workflow = self
            .workflows
            .find_by_id(&registration.workflow_id)
            .await?
            .ok_or_else(|| WebhookError::WorkflowNotFound(registration.workflow_id.clone()))?;
        if workflow.node(&registration.node).is_none() {
            return Err(WebhookError::Response {
                status: 404,
                message: format!("could not find node \"{}\" to start the workflow", registration.node),
            });
        }

        let start = StartRequest::new(workflow, ExecutionMode::Webhook)
            .starting_at(registration.node.clone())
            .with_input(vec![request.into_item(found.params)]);
        let handle = self.supervisor.start(start).await?;
        respond(registration.response_mode, handle).await
    }
}

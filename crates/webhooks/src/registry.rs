//! In-memory webhook registry shared by the active and test lifecycles.
//!
//! Registrations are grouped by a route digest:
//!
//! * static paths hash `(scope, method, path)`;
//! * paths with `:param` segments hash `(scope, method, webhookId, segment
//!   count)` and are served under `{webhookId}/{path}`.
//!
//! A production key is the route digest itself, so one route holds at most
//! one production webhook. Test keys are suffixed with `|{workflowId}`:
//! several workflows can be tested on the same route at once, and a request
//! is offered to them in registration order.
//!
//! Lookup first tries the request path as a static path. Failing that, the
//! first segment is taken as the webhook id and the remaining segments are
//! matched against the stored template, binding each `:param`.
//!
//! Inserting a key that is already taken fails with
//! [`WebhookError::Conflict`]; an entry is never replaced.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use engine::{Workflow, WorkflowId};
use nodes::{HttpMethod, NodeTypes, ResponseMode};

use crate::WebhookError;

/// Which lifecycle a registration belongs to. The two key spaces never
/// collide, so a workflow can be deployed and under test at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WebhookScope {
    Production,
    Test,
}

impl WebhookScope {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRegistration {
    pub method: HttpMethod,
    /// Normalised path template, without the webhook id prefix.
    pub path: String,
    pub webhook_id: Option<String>,
    pub workflow_id: WorkflowId,
    /// Node the execution starts at.
    pub node: String,
    pub response_mode: ResponseMode,
    pub scope: WebhookScope,
}

impl WebhookRegistration {
    pub fn is_dynamic(&self) -> bool {
        segments(&self.path).any(|s| s.starts_with(':'))
    }

    /// Path a caller has to hit, relative to the lifecycle's URL prefix.
    pub fn public_path(&self) -> String {
        match (&self.webhook_id, self.is_dynamic()) {
            (Some(id), true) => format!("{id}/{}", self.path),
            _ => self.path.clone(),
        }
    }

    /// Registry key; `None` when a dynamic path has no webhook id.
    pub fn key(&self) -> Option<String> {
        let route = if self.is_dynamic() {
            let id = self.webhook_id.as_deref()?;
            dynamic_route(self.scope, self.method, id, segments(&self.path).count())
        } else {
            static_route(self.scope, self.method, &self.path)
        };
        Some(match self.scope {
            WebhookScope::Production => route,
            WebhookScope::Test => format!("{route}|{}", self.workflow_id),
        })
    }
}

/// A resolved inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookMatch {
    pub key: String,
    pub registration: WebhookRegistration,
    /// Values bound to `:param` segments.
    pub params: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Strip leading/trailing and duplicate slashes.
pub fn normalize_path(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn static_route(scope: WebhookScope, method: HttpMethod, path: &str) -> String {
    digest(&[scope.as_str(), method.as_str(), path])
}

fn dynamic_route(scope: WebhookScope, method: HttpMethod, webhook_id: &str, segment_count: usize) -> String {
    digest(&[scope.as_str(), method.as_str(), webhook_id, &segment_count.to_string()])
}

/// The route digest a key belongs to.
fn route_of(key: &str) -> &str {
    key.split_once('|').map_or(key, |(route, _)| route)
}

/// Bind `:param` segments of `template` against `concrete`. `None` when a
/// static segment differs or the lengths disagree.
fn bind_params(template: &str, concrete: &[&str]) -> Option<BTreeMap<String, String>> {
    let template: Vec<&str> = segments(template).collect();
    if template.len() != concrete.len() {
        return None;
    }
    let mut params = BTreeMap::new();
    for (t, c) in template.iter().zip(concrete) {
        match t.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_owned(), (*c).to_owned());
            }
            None if t == c => {}
            None => return None,
        }
    }
    Some(params)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Slot {
    key: String,
    registration: WebhookRegistration,
}

#[derive(Clone, Default)]
pub struct WebhookRegistry {
    /// Route digest → registrations on that route, oldest first.
    routes: Arc<DashMap<String, Vec<Slot>>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a registration and return its key.
    pub fn add(&self, mut registration: WebhookRegistration) -> Result<String, WebhookError> {
        registration.path = normalize_path(&registration.path);
        let key = registration.key().ok_or_else(|| WebhookError::InvalidPath {
            path: registration.path.clone(),
            reason: "paths with parameters need a webhook id".into(),
        })?;

        let conflict = || WebhookError::Conflict {
            method: registration.method,
            path: registration.public_path(),
        };
        match self.routes.entry(route_of(&key).to_owned()) {
            Entry::Occupied(mut slots) => {
                if slots.get().iter().any(|slot| slot.key == key) {
                    return Err(conflict());
                }
                log_added(&registration);
                slots.get_mut().push(Slot { key: key.clone(), registration });
            }
            Entry::Vacant(slot) => {
                log_added(&registration);
                slot.insert(vec![Slot { key: key.clone(), registration }]);
            }
        }
        Ok(key)
    }

    /// Insert every registration or none of them.
    pub fn add_all(
        &self,
        registrations: Vec<WebhookRegistration>,
    ) -> Result<Vec<String>, WebhookError> {
        let mut keys = Vec::with_capacity(registrations.len());
        for registration in registrations {
            match self.add(registration) {
                Ok(key) => keys.push(key),
                Err(e) => {
                    warn!("rolling back {} webhook(s): {e}", keys.len());
                    self.remove_all(&keys);
                    return Err(e);
                }
            }
        }
        Ok(keys)
    }

    pub fn remove(&self, key: &str) -> Option<WebhookRegistration> {
        let route = route_of(key);
        let removed = {
            let mut slots = self.routes.get_mut(route)?;
            let at = slots.iter().position(|slot| slot.key == key)?;
            slots.remove(at).registration
        };
        self.routes.remove_if(route, |_, slots| slots.is_empty());
        Some(removed)
    }

    pub fn remove_all(&self, keys: &[String]) {
        for key in keys {
            self.remove(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<WebhookRegistration> {
        let slots = self.routes.get(route_of(key))?;
        slots.iter().find(|slot| slot.key == key).map(|slot| slot.registration.clone())
    }

    /// The first registration matching the request.
    pub fn find(
        &self,
        scope: WebhookScope,
        method: HttpMethod,
        path: &str,
    ) -> Result<WebhookMatch, WebhookError> {
        self.find_all(scope, method, path)?
            .into_iter()
            .next()
            .ok_or_else(|| WebhookError::NotRegistered { method, path: normalize_path(path) })
    }

    /// Every registration matching the request, oldest first. Production
    /// routes yield at most one.
    pub fn find_all(
        &self,
        scope: WebhookScope,
        method: HttpMethod,
        path: &str,
    ) -> Result<Vec<WebhookMatch>, WebhookError> {
        let path = normalize_path(path);
        let not_registered = || WebhookError::NotRegistered { method, path: path.clone() };

        if let Some(slots) = self.routes.get(&static_route(scope, method, &path)) {
            let found: Vec<WebhookMatch> = slots
                .iter()
                .map(|slot| WebhookMatch {
                    key: slot.key.clone(),
                    registration: slot.registration.clone(),
                    params: BTreeMap::new(),
                })
                .collect();
            if !found.is_empty() {
                return Ok(found);
            }
        }

        let mut parts = segments(&path);
        let webhook_id = parts.next().ok_or_else(not_registered)?;
        let rest: Vec<&str> = parts.collect();

        let slots = self
            .routes
            .get(&dynamic_route(scope, method, webhook_id, rest.len()))
            .ok_or_else(not_registered)?;
        let found: Vec<WebhookMatch> = slots
            .iter()
            .filter_map(|slot| {
                bind_params(&slot.registration.path, &rest).map(|params| WebhookMatch {
                    key: slot.key.clone(),
                    registration: slot.registration.clone(),
                    params,
                })
            })
            .collect();
        if found.is_empty() {
            return Err(not_registered());
        }
        Ok(found)
    }

    /// Methods registered for `path`, for answering `OPTIONS`.
    pub fn find_methods(&self, scope: WebhookScope, path: &str) -> Vec<HttpMethod> {
        HttpMethod::ALL
            .into_iter()
            .filter(|m| self.find(scope, *m, path).is_ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.iter().map(|slots| slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn log_added(registration: &WebhookRegistration) {
    debug!(
        method = %registration.method,
        path = %registration.public_path(),
        workflow_id = %registration.workflow_id,
        "webhook registered"
    );
}

/// Webhooks a workflow declares, through the node types of its enabled
/// nodes.
pub fn collect_webhooks(
    workflow: &Workflow,
    node_types: &NodeTypes,
    scope: WebhookScope,
) -> Vec<WebhookRegistration> {
    workflow
        .nodes
        .iter()
        .filter(|node| !node.disabled)
        .filter_map(|node| node_types.get(&node.node_type).map(|imp| (node, imp)))
        .flat_map(|(node, imp)| {
            imp.webhooks(&node.parameters).into_iter().map(move |desc| WebhookRegistration {
                method: desc.http_method,
                path: normalize_path(&desc.path),
                webhook_id: node.webhook_id.clone(),
                workflow_id: workflow.id.clone(),
                node: node.name.clone(),
                response_mode: desc.response_mode,
                scope,
            })
        })
        .collect()
}

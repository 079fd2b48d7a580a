//! Node and credential type registry.
//!
//! The registry resolves a type name to its implementation and the source
//! it was loaded from. Only the metadata half ([`NodeTypeInfo`]) crosses the
//! supervisor/worker boundary; each side builds its own registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::builtin::{ExecuteWorkflowNode, NoOpNode, SetNode, WebhookNode};
use crate::ExecutableNode;

/// Serialisable description of a node type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeInfo {
    pub type_name: String,
    pub source_path: String,
}

/// Serialisable description of a credential type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialTypeInfo {
    pub name: String,
    pub source_path: String,
}

#[derive(Clone)]
struct NodeTypeEntry {
    source_path: String,
    implementation: Arc<dyn ExecutableNode>,
}

/// Maps `type_name` strings to `ExecutableNode` implementations.
#[derive(Clone, Default)]
pub struct NodeTypes {
    nodes: HashMap<String, NodeTypeEntry>,
    credentials: HashMap<String, CredentialTypeInfo>,
}

impl NodeTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in node types.
    pub fn with_builtins() -> Self {
        let mut types = Self::new();
        types.register("webhook", "builtin://webhook", Arc::new(WebhookNode));
        types.register("noOp", "builtin://no-op", Arc::new(NoOpNode));
        types.register("set", "builtin://set", Arc::new(SetNode));
        types.register(
            "executeWorkflow",
            "builtin://execute-workflow",
            Arc::new(ExecuteWorkflowNode),
        );
        types
    }

    /// Register (or replace) a node type.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        source_path: impl Into<String>,
        implementation: Arc<dyn ExecutableNode>,
    ) -> &mut Self {
        self.nodes.insert(
            type_name.into(),
            NodeTypeEntry { source_path: source_path.into(), implementation },
        );
        self
    }

    pub fn register_credential_type(
        &mut self,
        name: impl Into<String>,
        source_path: impl Into<String>,
    ) -> &mut Self {
        let name = name.into();
        self.credentials.insert(
            name.clone(),
            CredentialTypeInfo { name, source_path: source_path.into() },
        );
        self
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn ExecutableNode>> {
        self.nodes.get(type_name).map(|e| &e.implementation)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.nodes.contains_key(type_name)
    }

    /// Implementation and source for a type name.
    pub fn resolve(&self, type_name: &str) -> Option<(Arc<dyn ExecutableNode>, NodeTypeInfo)> {
        self.nodes.get(type_name).map(|e| {
            (
                e.implementation.clone(),
                NodeTypeInfo { type_name: type_name.to_owned(), source_path: e.source_path.clone() },
            )
        })
    }

    pub fn resolve_credential_type(&self, name: &str) -> Option<CredentialTypeInfo> {
        self.credentials.get(name).cloned()
    }
}

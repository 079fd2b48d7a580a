//! Engine-level error types.

use thiserror::Error;

/// Errors produced while validating or planning a workflow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same name.
    #[error("duplicate node name: '{0}'")]
    DuplicateNodeName(String),

    /// A connection references a node that doesn't exist in the workflow.
    #[error("connection references unknown node '{node}' ({side} side)")]
    UnknownNodeReference { node: String, side: &'static str },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// A start or destination node is not part of the workflow.
    #[error("node '{0}' is not part of the workflow")]
    UnknownNode(String),

    /// No implementation is registered for a node type.
    #[error("node '{node}' has unknown type '{node_type}'")]
    UnknownNodeType { node: String, node_type: String },

    /// The workflow definition could not be decoded.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),
}

/// Errors from the persistence collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),

    #[error("stored workflow '{id}' is malformed: {reason}")]
    Malformed { id: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

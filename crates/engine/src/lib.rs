//! `engine` crate — domain models, graph planning, the in-worker execution
//! engine and the persistence collaborator traits.

pub mod dag;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod models;
pub mod postgres;
pub mod store;

pub use dag::{execution_plan, validate_dag, ExecutionPlan};
pub use error::{EngineError, StoreError};
pub use executor::{ExecutorConfig, RunEnv, WorkflowExecutor};
pub use hooks::{ExecutionHooks, NoopHooks};
pub use models::{
    ConnectionTarget, Connections, ExecutionError, ExecutionId, ExecutionMode, ExecutionRequest,
    ExecutionResult, Node, NodeRun, ResultData, RunData, Workflow, WorkflowId, WorkflowSettings,
};
pub use store::{
    CredentialsResolver, ExecutionStore, MemoryStore, NewExecution, NoCredentials,
    StaticCredentials, WorkflowFilter, WorkflowStore,
};

#[cfg(test)]
mod executor_tests;

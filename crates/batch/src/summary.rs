//! Per-workflow outcomes and the aggregated batch summary.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use engine::{ExecutionResult, WorkflowId};

use crate::diff::DiffEntry;
use crate::policy::ExecutionStatus;
use crate::BatchError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub execution_status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Node type → number of nodes of that type that ran.
    pub covered_nodes: BTreeMap<String, usize>,
    pub execution_time_ms: u64,
    /// Structural changes against the compared snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<DiffEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
}

impl BatchOutcome {
    pub fn new(workflow_id: impl Into<WorkflowId>, workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            execution_status: ExecutionStatus::Running,
            error: None,
            covered_nodes: BTreeMap::new(),
            execution_time_ms: 0,
            changes: None,
            execution: None,
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus, error: Option<String>) -> Self {
        self.execution_status = status;
        self.error = error;
        self
    }
}

/// Coarse result for dashboards: `flaky` means only warnings remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Clean,
    Flaky,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_workflows: usize,
    pub successful_executions: usize,
    pub warning_executions: usize,
    pub failed_executions: usize,
    pub covered_nodes: BTreeMap<String, usize>,
    pub failures: Vec<FailureEntry>,
    pub signal: Signal,
    pub executions: Vec<BatchOutcome>,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: Vec<BatchOutcome>, short_output: bool) -> Self {
        let count = |status| outcomes.iter().filter(|o| o.execution_status == status).count();
        let successful_executions = count(ExecutionStatus::Success);
        let warning_executions = count(ExecutionStatus::Warning);
        let failed_executions = count(ExecutionStatus::Error);

        let mut covered_nodes = BTreeMap::new();
        for outcome in &outcomes {
            for (node_type, n) in &outcome.covered_nodes {
                *covered_nodes.entry(node_type.clone()).or_insert(0) += n;
            }
        }

        let failures = outcomes
            .iter()
            .filter(|o| o.execution_status.is_failure())
            .map(|o| FailureEntry {
                workflow_id: o.workflow_id.clone(),
                workflow_name: o.workflow_name.clone(),
                status: o.execution_status,
                message: o.error.clone(),
            })
            .collect();

        let signal = if failed_executions > 0 {
            Signal::Failed
        } else if warning_executions > 0 {
            Signal::Flaky
        } else {
            Signal::Clean
        };

        let total_workflows = outcomes.len();
        let executions = if short_output {
            outcomes
                .into_iter()
                .filter(|o| o.execution_status != ExecutionStatus::Success)
                .collect()
        } else {
            outcomes
        };

        Self {
            total_workflows,
            successful_executions,
            warning_executions,
            failed_executions,
            covered_nodes,
            failures,
            signal,
            executions,
        }
    }

    /// `1` when errors remain, `0` otherwise. Warnings alone still exit `0`;
    /// they are reported through `signal: "flaky"` in the JSON summary.
    pub fn exit_code(&self) -> i32 {
        if self.failed_executions > 0 {
            1
        } else {
            0
        }
    }

    pub async fn write_json(&self, path: &Path) -> Result<(), BatchError> {
        let body = serde_json::to_vec_pretty(self)
            .map_err(|source| BatchError::Json { path: path.to_owned(), source })?;
        tokio::fs::write(path, body).await.map_err(|e| BatchError::io(path, e))
    }
}

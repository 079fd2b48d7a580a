//! The batch scheduler.
//!
//! A pass pushes its workflows into a FIFO queue and starts `concurrency`
//! lanes. Each lane pops one workflow at a time and runs it to completion,
//! so at most `concurrency` executions are in flight. After the main pass,
//! up to `retries` rounds re-run the workflows that ended in warning or
//! error; a retried run only replaces the earlier outcome when it succeeds.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use engine::{ExecutionResult, Workflow, WorkflowFilter, WorkflowStore};

use crate::annotations::{workflow_annotations, WorkflowAnnotations};
use crate::config::BatchConfig;
use crate::diff::structural_diff;
use crate::executor::BatchExecutor;
use crate::normalize::snapshot_value;
use crate::policy::{ClassificationPolicy, ExecutionStatus};
use crate::snapshot::{read_snapshot, write_snapshot};
use crate::summary::{BatchOutcome, BatchSummary};
use crate::BatchError;

/// A queued workflow with its annotations parsed up front.
struct BatchItem {
    index: usize,
    workflow: Workflow,
    annotations: Result<WorkflowAnnotations, String>,
}

type Queue = Arc<Mutex<VecDeque<(usize, Arc<BatchItem>)>>>;

struct Inner {
    executor: Arc<dyn BatchExecutor>,
    policy: ClassificationPolicy,
    config: BatchConfig,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct BatchRunner {
    inner: Arc<Inner>,
}

impl BatchRunner {
    pub fn new(executor: Arc<dyn BatchExecutor>, config: BatchConfig) -> Self {
        Self::with_policy(executor, config, ClassificationPolicy::default())
    }

    pub fn with_policy(
        executor: Arc<dyn BatchExecutor>,
        config: BatchConfig,
        policy: ClassificationPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner { executor, policy, config, cancel: CancellationToken::new() }),
        }
    }

    /// Cancelling stops lanes from taking new work and abandons the runs
    /// in flight.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    #[instrument(skip_all, fields(workflows = workflows.len()))]
    pub async fn run(&self, workflows: Vec<Workflow>) -> BatchSummary {
        let items: Vec<Arc<BatchItem>> = workflows
            .into_iter()
            .enumerate()
            .map(|(index, workflow)| {
                let annotations = workflow_annotations(&workflow).map_err(|e| e.to_string());
                Arc::new(BatchItem { index, workflow, annotations })
            })
            .collect();

        let mut outcomes = self.run_pass(&items).await;

        for round in 1..=self.inner.config.retries {
            if self.inner.cancel.is_cancelled() {
                break;
            }
            let failing: Vec<Arc<BatchItem>> = items
                .iter()
                .filter(|item| outcomes[item.index].execution_status.is_failure())
                .cloned()
                .collect();
            if failing.is_empty() {
                break;
            }
            info!(round, workflows = failing.len(), "retrying failed workflows");

            let retried = self.run_pass(&failing).await;
            for (item, outcome) in failing.iter().zip(retried) {
                if outcome.execution_status == ExecutionStatus::Success {
                    outcomes[item.index] = outcome;
                }
            }
        }

        let summary = BatchSummary::from_outcomes(outcomes, self.inner.config.short_output);
        info!(
            successful = summary.successful_executions,
            warnings = summary.warning_executions,
            errors = summary.failed_executions,
            "batch finished"
        );
        summary
    }

    /// Run `items` through the lanes; outcomes come back in input order.
    async fn run_pass(&self, items: &[Arc<BatchItem>]) -> Vec<BatchOutcome> {
        let queue: Queue = Arc::new(Mutex::new(items.iter().cloned().enumerate().collect()));
        let lanes = self.inner.config.concurrency.max(1).min(items.len().max(1));
        let progress = Progress::new(self.inner.config.progress, items.len());

        let mut set = JoinSet::new();
        for lane in 0..lanes {
            let inner = self.inner.clone();
            let queue = queue.clone();
            let bar = progress.lane(lane);
            let total = progress.total.clone();
            set.spawn(async move {
                let mut done = Vec::new();
                while !inner.cancel.is_cancelled() {
                    let next = queue.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
                    let Some((position, item)) = next else {
                        break;
                    };
                    bar.set_message(format!("lane {lane}: {} ({})", item.workflow.name, item.workflow.id));
                    let outcome = inner.run_one(&item).await;
                    total.inc(1);
                    done.push((position, outcome));
                }
                bar.finish_and_clear();
                done
            });
        }

        let mut by_position = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => by_position.extend(done),
                Err(e) => error!("batch lane panicked: {e}"),
            }
        }
        progress.total.finish_and_clear();

        // Items never taken off the queue were cut short by cancellation.
        items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                by_position.remove(&position).unwrap_or_else(|| {
                    BatchOutcome::new(item.workflow.id.clone(), item.workflow.name.clone())
                        .with_status(ExecutionStatus::Warning, Some("batch run cancelled".into()))
                })
            })
            .collect()
    }
}

impl Inner {
    #[instrument(skip_all, fields(workflow_id = %item.workflow.id))]
    async fn run_one(&self, item: &BatchItem) -> BatchOutcome {
        let workflow = &item.workflow;
        let outcome = BatchOutcome::new(workflow.id.clone(), workflow.name.clone());
        let annotations = match &item.annotations {
            Ok(annotations) => annotations,
            Err(reason) => return outcome.with_status(ExecutionStatus::Error, Some(reason.clone())),
        };

        let started = Instant::now();
        let run = tokio::time::timeout(self.config.run_timeout, self.executor.execute(workflow.clone()));
        let finished = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return outcome.with_status(ExecutionStatus::Warning, Some("batch run cancelled".into()));
            }
            finished = run => finished,
        };

        let mut outcome = match finished {
            Err(_) => {
                warn!("run exceeded {:?}", self.config.run_timeout);
                outcome.with_status(
                    ExecutionStatus::Warning,
                    Some(format!(
                        "Workflow execution timed out after {} seconds",
                        self.config.run_timeout.as_secs()
                    )),
                )
            }
            Ok(Err(e)) => outcome.with_status(ExecutionStatus::Error, Some(e.to_string())),
            Ok(Ok(result)) => self.judge(workflow, annotations, outcome, result).await,
        };
        outcome.execution_time_ms = started.elapsed().as_millis() as u64;

        match outcome.execution_status {
            ExecutionStatus::Error => {
                warn!(error = outcome.error.as_deref().unwrap_or_default(), "workflow failed")
            }
            status => info!(?status, "workflow finished"),
        }
        outcome
    }

    /// Classify a finished run, then compare and snapshot it.
    async fn judge(
        &self,
        workflow: &Workflow,
        annotations: &WorkflowAnnotations,
        outcome: BatchOutcome,
        result: ExecutionResult,
    ) -> BatchOutcome {
        let (status, message) = self.policy.classify(&result);
        let mut outcome = outcome.with_status(status, message);
        outcome.covered_nodes = covered_nodes(workflow, &result);

        if self.config.compare_dir.is_some() || self.config.snapshot_dir.is_some() {
            let fresh = snapshot_value(&result, annotations, self.config.shallow);
            if let Err(e) = self.compare_and_store(workflow, &fresh, &mut outcome).await {
                outcome = outcome.with_status(ExecutionStatus::Error, Some(e.to_string()));
            }
        }
        outcome.execution = Some(result);
        outcome
    }

    async fn compare_and_store(
        &self,
        workflow: &Workflow,
        fresh: &serde_json::Value,
        outcome: &mut BatchOutcome,
    ) -> Result<(), BatchError> {
        if let Some(dir) = &self.config.compare_dir {
            if let Some(stored) = read_snapshot(dir, &workflow.id).await? {
                let changes = structural_diff(&stored, fresh);
                if !changes.is_empty() {
                    outcome.execution_status = ExecutionStatus::Error;
                    outcome.error = Some(format!(
                        "Workflow {} may contain breaking changes",
                        workflow.id
                    ));
                    outcome.changes = Some(changes);
                }
            }
        }
        if let Some(dir) = &self.config.snapshot_dir {
            write_snapshot(dir, &workflow.id, fresh).await?;
        }
        Ok(())
    }
}

/// Node type → number of nodes of that type with run data.
fn covered_nodes(workflow: &Workflow, result: &ExecutionResult) -> BTreeMap<String, usize> {
    let mut covered = BTreeMap::new();
    for name in result.result_data.run_data.keys() {
        if let Some(node) = workflow.node(name) {
            *covered.entry(node.node_type.clone()).or_insert(0) += 1;
        }
    }
    covered
}

/// Workflows a batch runs: the requested ids (or all), minus the skip list,
/// ordered by id.
pub async fn select_workflows(
    store: &dyn WorkflowStore,
    config: &BatchConfig,
) -> Result<Vec<Workflow>, BatchError> {
    let filter = WorkflowFilter { active: None, ids: config.ids.clone() };
    let mut workflows = store.find_many(&filter).await?;
    if let Some(ids) = &config.ids {
        for id in ids.iter().filter(|id| !workflows.iter().any(|wf| &wf.id == *id)) {
            warn!(workflow_id = %id, "requested workflow not found");
        }
    }
    workflows.retain(|wf| !config.skip.contains(&wf.id));
    workflows.sort_by(|a, b| {
        match (a.id.parse::<u64>(), b.id.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.id.cmp(&b.id),
        }
    });
    Ok(workflows)
}

/// Live lane status on stderr.
struct Progress {
    multi: MultiProgress,
    total: ProgressBar,
}

impl Progress {
    fn new(enabled: bool, len: usize) -> Self {
        let target = if enabled { ProgressDrawTarget::stderr() } else { ProgressDrawTarget::hidden() };
        let multi = MultiProgress::with_draw_target(target);
        let total = multi.add(ProgressBar::new(len as u64));
        total.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} workflows ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { multi, total }
    }

    fn lane(&self, lane: usize) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("lane {lane}: idle"));
        bar
    }
}

//! `batch` crate — regression runs over many workflows.
//!
//! * [`scheduler`] — lanes, per-run timeout, retry rounds.
//! * [`policy`] — success / warning / error classification.
//! * [`annotations`], [`normalize`], [`diff`], [`snapshot`] — snapshot
//!   comparison.
//! * [`summary`] — outcomes, counts and the exit signal.

pub mod annotations;
pub mod config;
pub mod diff;
pub mod error;
pub mod executor;
pub mod normalize;
pub mod policy;
pub mod scheduler;
pub mod snapshot;
pub mod summary;

pub use annotations::{workflow_annotations, NodeTestAnnotations, WorkflowAnnotations};
pub use config::{parse_ids, read_skip_list, BatchConfig};
pub use diff::{structural_diff, ChangeKind, DiffEntry};
pub use error::BatchError;
pub use executor::{BatchExecutor, SupervisorExecutor};
pub use policy::{ClassificationPolicy, ExecutionStatus, DEFAULT_WARNING_SUBSTRINGS};
pub use scheduler::{select_workflows, BatchRunner};
pub use summary::{BatchOutcome, BatchSummary, FailureEntry, Signal};

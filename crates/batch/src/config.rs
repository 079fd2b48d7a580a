//! Batch-run settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use engine::WorkflowId;

use crate::BatchError;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Workflows to run; `None` runs every stored workflow.
    pub ids: Option<Vec<WorkflowId>>,
    /// Workflows never run.
    pub skip: Vec<WorkflowId>,
    /// Number of lanes; each runs one execution at a time.
    pub concurrency: usize,
    /// Rounds re-running workflows that ended in warning or error.
    pub retries: u32,
    /// Hard limit for a single run.
    pub run_timeout: Duration,
    /// Directory to write fresh snapshots to.
    pub snapshot_dir: Option<PathBuf>,
    /// Directory to read baseline snapshots from.
    pub compare_dir: Option<PathBuf>,
    /// Collapse nested output values before snapshotting and comparing.
    pub shallow: bool,
    /// Leave successful runs out of the execution dump.
    pub short_output: bool,
    /// Path to write the JSON summary to.
    pub output: Option<PathBuf>,
    /// Draw live lane status on the terminal.
    pub progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            ids: None,
            skip: Vec::new(),
            concurrency: 1,
            retries: 1,
            run_timeout: Duration::from_secs(180),
            snapshot_dir: None,
            compare_dir: None,
            shallow: false,
            short_output: false,
            output: None,
            progress: false,
        }
    }
}

/// Parse a comma-separated list of numeric workflow ids.
pub fn parse_ids(raw: &str) -> Result<Vec<WorkflowId>, BatchError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|id| {
            if id.chars().all(|c| c.is_ascii_digit()) {
                Ok(id.to_owned())
            } else {
                Err(BatchError::InvalidIds(raw.to_owned()))
            }
        })
        .collect()
}

/// Read a skip list file holding comma-separated ids.
pub async fn read_skip_list(path: &Path) -> Result<Vec<WorkflowId>, BatchError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| BatchError::io(path, e))?;
    parse_ids(&raw.replace(['\n', '\r'], ","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_comma_separated_numbers() {
        assert_eq!(parse_ids("1, 2,,30").unwrap(), vec!["1", "2", "30"]);
        assert!(matches!(parse_ids("1,abc"), Err(BatchError::InvalidIds(_))));
    }

    #[tokio::test]
    async fn skip_list_accepts_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skip.txt");
        std::fs::write(&path, "4,5\n6\n").unwrap();
        assert_eq!(read_skip_list(&path).await.unwrap(), vec!["4", "5", "6"]);
    }
}

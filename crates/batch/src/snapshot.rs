//! Snapshot files: one pretty-printed JSON document per workflow id.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::BatchError;

pub fn snapshot_path(dir: &Path, workflow_id: &str) -> PathBuf {
    dir.join(format!("{workflow_id}-snapshot.json"))
}

pub async fn write_snapshot(dir: &Path, workflow_id: &str, value: &Value) -> Result<(), BatchError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| BatchError::io(dir, e))?;
    let path = snapshot_path(dir, workflow_id);
    let body = serde_json::to_vec_pretty(value)
        .map_err(|source| BatchError::Json { path: path.clone(), source })?;
    tokio::fs::write(&path, body).await.map_err(|e| BatchError::io(&path, e))?;
    debug!(path = %path.display(), "snapshot written");
    Ok(())
}

/// The stored snapshot, or `None` when the workflow has none yet.
pub async fn read_snapshot(dir: &Path, workflow_id: &str) -> Result<Option<Value>, BatchError> {
    let path = snapshot_path(dir, workflow_id);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BatchError::io(&path, e)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|source| BatchError::Json { path, source })
}

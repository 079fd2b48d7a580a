//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: String,
    pub name: String,
    pub active: bool,
    /// Full JSON workflow definition (nodes, connections, settings, …)
    pub definition: serde_json::Value,
    pub static_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// executions
// ---------------------------------------------------------------------------

/// Possible statuses for an execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Success,
    Error,
    Canceled,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running"  => Ok(Self::Running),
            "success"  => Ok(Self::Success),
            "error"    => Ok(Self::Error),
            "canceled" => Ok(Self::Canceled),
            other      => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A persisted execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRow {
    pub id: i64,
    pub workflow_id: String,
    pub mode: String,
    pub status: String,
    pub finished: bool,
    pub retry_of: Option<i64>,
    pub parent_id: Option<i64>,
    /// Serialised `ExecutionResult`.
    pub data: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

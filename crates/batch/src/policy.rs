//! Outcome classification.
//!
//! Some third-party failures are transient and should not fail a batch on
//! their own. An error whose message contains one of the configured
//! substrings (case-insensitive) is reported as a warning instead of an
//! error. The match is purely textual, so an unrelated error containing the
//! same text is downgraded too; keep the list short.

use serde::{Deserialize, Serialize};

use engine::ExecutionResult;

/// Status of one workflow in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Warning,
    Error,
}

impl ExecutionStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Warning | Self::Error)
    }
}

pub const DEFAULT_WARNING_SUBSTRINGS: &[&str] = &[
    "refresh token is invalid",
    "unable to connect to",
    "econnreset",
    "429",
    "econnrefused",
    "missing a required parameter",
    "request timed out",
];

#[derive(Debug, Clone)]
pub struct ClassificationPolicy {
    warning_substrings: Vec<String>,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_WARNING_SUBSTRINGS.iter().copied())
    }
}

impl ClassificationPolicy {
    pub fn new<I, S>(substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            warning_substrings: substrings.into_iter().map(|s| s.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn is_transient(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.warning_substrings.iter().any(|s| message.contains(s.as_str()))
    }

    /// Status and error message of a finished run.
    pub fn classify(&self, result: &ExecutionResult) -> (ExecutionStatus, Option<String>) {
        match result.error() {
            None => (ExecutionStatus::Success, None),
            Some(error) if self.is_transient(&error.message) => {
                (ExecutionStatus::Warning, Some(error.message.clone()))
            }
            Some(error) => (ExecutionStatus::Error, Some(error.message.clone())),
        }
    }
}

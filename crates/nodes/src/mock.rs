//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{traits::ExecutionContext, ExecutableNode, NodeError};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value as a single output item.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Sleep, then return the value.
    Delay(Duration, Value),
    /// Fail retryably for the first `n` calls, then return the value.
    FlakyTimes(usize, Value),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl MockNode {
    fn with(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self { name: name.into(), behaviour, calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that takes `delay` before answering.
    pub fn sleeping(name: impl Into<String>, delay: Duration, value: Value) -> Self {
        Self::with(name, MockBehaviour::Delay(delay, value))
    }

    /// Create a mock that fails retryably `times` times before succeeding.
    pub fn flaky(name: impl Into<String>, times: usize, value: Value) -> Self {
        Self::with(name, MockBehaviour::FlakyTimes(times, value))
    }

    fn calls(&self) -> MutexGuard<'_, Vec<Vec<Value>>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    fn output(&self, v: &Value) -> Vec<Value> {
        // Tag the output with the node name so tests can trace data flow.
        let mut out = json!({ "node": self.name });
        if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
            for (k, val) in v_obj {
                out_obj.insert(k.clone(), val.clone());
            }
        }
        vec![out]
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(
        &self,
        _parameters: &Value,
        input: Vec<Value>,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<Value>, NodeError> {
        let call_index = {
            let mut calls = self.calls();
            calls.push(input);
            calls.len()
        };

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(self.output(v)),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::Delay(delay, v) => {
                tokio::time::sleep(*delay).await;
                Ok(self.output(v))
            }
            MockBehaviour::FlakyTimes(times, v) => {
                if call_index <= *times {
                    Err(NodeError::Retryable(format!("{} flaked on call {call_index}", self.name)))
                } else {
                    Ok(self.output(v))
                }
            }
        }
    }
}

//! Built-in node types.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    ExecutableNode, ExecutionContext, HttpMethod, NodeError, ResponseMode, WebhookDescription,
};

/// Trigger node that starts a workflow from an HTTP request.
///
/// Parameters: `httpMethod` (default `GET`), `path` (required),
/// `responseMode` (default `onReceived`). The request data arrives as the
/// node's input and is passed through unchanged.
pub struct WebhookNode;

#[async_trait]
impl ExecutableNode for WebhookNode {
    async fn execute(
        &self,
        _parameters: &Value,
        input: Vec<Value>,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<Value>, NodeError> {
        Ok(input)
    }

    fn webhooks(&self, parameters: &Value) -> Vec<WebhookDescription> {
        let Some(path) = parameters.get("path").and_then(Value::as_str) else {
            return Vec::new();
        };
        let http_method = parameters
            .get("httpMethod")
            .and_then(Value::as_str)
            .and_then(|m| m.parse().ok())
            .unwrap_or(HttpMethod::Get);
        let response_mode = parameters
            .get("responseMode")
            .cloned()
            .and_then(|m| serde_json::from_value(m).ok())
            .unwrap_or(ResponseMode::OnReceived);

        vec![WebhookDescription { http_method, path: path.to_owned(), response_mode }]
    }
}

/// Passes its input through untouched.
pub struct NoOpNode;

#[async_trait]
impl ExecutableNode for NoOpNode {
    async fn execute(
        &self,
        _parameters: &Value,
        input: Vec<Value>,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<Value>, NodeError> {
        Ok(input)
    }
}

/// Merges the object in its `values` parameter into every input item.
/// With no input it emits a single item made of `values`.
pub struct SetNode;

#[async_trait]
impl ExecutableNode for SetNode {
    async fn execute(
        &self,
        parameters: &Value,
        input: Vec<Value>,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<Value>, NodeError> {
        let values = parameters
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| NodeError::MissingParameter("values".into()))?;

        if input.is_empty() {
            return Ok(vec![Value::Object(values.clone())]);
        }

        Ok(input
            .into_iter()
            .map(|mut item| {
                if let Some(obj) = item.as_object_mut() {
                    for (k, v) in values {
                        obj.insert(k.clone(), v.clone());
                    }
                    item
                } else {
                    Value::Object(values.clone())
                }
            })
            .collect())
    }
}

/// Runs the workflow given inline in its `workflow` parameter and returns
/// that workflow's final output.
pub struct ExecuteWorkflowNode;

#[async_trait]
impl ExecutableNode for ExecuteWorkflowNode {
    async fn execute(
        &self,
        parameters: &Value,
        input: Vec<Value>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Value>, NodeError> {
        let definition = parameters
            .get("workflow")
            .cloned()
            .ok_or_else(|| NodeError::MissingParameter("workflow".into()))?;

        let runner = ctx.sub_workflows.as_ref().ok_or_else(|| {
            NodeError::Fatal("sub-workflow execution is not available in this context".into())
        })?;

        runner.run_workflow(definition, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            workflow_id: "1".into(),
            execution_id: "10".into(),
            node_name: "node".into(),
            credentials: HashMap::new(),
            sub_workflows: None,
            ui: None,
            static_data: Default::default(),
        }
    }

    #[test]
    fn webhook_node_declares_its_path() {
        let hooks = WebhookNode.webhooks(&json!({ "path": "orders", "httpMethod": "POST" }));
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].http_method, HttpMethod::Post);
        assert_eq!(hooks[0].path, "orders");
        assert_eq!(hooks[0].response_mode, ResponseMode::OnReceived);
    }

    #[test]
    fn webhook_node_without_path_declares_nothing() {
        assert!(WebhookNode.webhooks(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn set_node_merges_values() {
        let out = SetNode
            .execute(&json!({ "values": { "b": 2 } }), vec![json!({ "a": 1 })], &ctx())
            .await
            .unwrap();
        assert_eq!(out, vec![json!({ "a": 1, "b": 2 })]);
    }

    #[tokio::test]
    async fn execute_workflow_without_runner_is_fatal() {
        let err = ExecuteWorkflowNode
            .execute(&json!({ "workflow": {} }), vec![], &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}

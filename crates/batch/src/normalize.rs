//! Turns an execution result into the value that is snapshotted and
//! compared.

use serde_json::{Map, Value};

use engine::ExecutionResult;

use crate::annotations::WorkflowAnnotations;

pub const ARRAY_SENTINEL: &str = "~array~";
pub const OBJECT_SENTINEL: &str = "~object~";

/// `{ node: [[items of run 0], [items of run 1], ..] }` with node
/// annotations applied, and nested fields collapsed when `shallow` is set.
pub fn snapshot_value(
    result: &ExecutionResult,
    annotations: &WorkflowAnnotations,
    shallow: bool,
) -> Value {
    let mut nodes = Map::new();
    for (node, runs) in &result.result_data.run_data {
        let annotation = annotations.get(node);
        let runs = runs
            .iter()
            .map(|run| {
                let mut items = run.output.clone();
                if let Some(cap) = annotation.and_then(|a| a.cap_results_length) {
                    items.truncate(cap);
                }
                for item in &mut items {
                    if let Some(a) = annotation {
                        drop_properties(item, &a.ignored_properties);
                    }
                    if shallow {
                        collapse(item);
                    }
                }
                Value::Array(items)
            })
            .collect();
        nodes.insert(node.clone(), Value::Array(runs));
    }
    Value::Object(nodes)
}

fn drop_properties(item: &mut Value, properties: &[String]) {
    if let Value::Object(fields) = item {
        for property in properties {
            fields.remove(property);
        }
    }
}

fn collapse(item: &mut Value) {
    let Value::Object(fields) = item else {
        return;
    };
    for value in fields.values_mut() {
        match value {
            Value::Array(_) => *value = Value::String(ARRAY_SENTINEL.into()),
            Value::Object(_) => *value = Value::String(OBJECT_SENTINEL.into()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::NodeTestAnnotations;
    use chrono::Utc;
    use engine::{ExecutionMode, NodeRun};
    use serde_json::json;

    fn result(items: Vec<Value>) -> ExecutionResult {
        let mut result = ExecutionResult::new(ExecutionMode::Cli, Utc::now());
        result.result_data.run_data.insert(
            "Feed".into(),
            vec![NodeRun { start_time: Utc::now(), execution_time_ms: 1, output: items, error: None }],
        );
        result
    }

    #[test]
    fn annotations_cap_and_strip_items() {
        let annotations = WorkflowAnnotations::from([(
            "Feed".to_string(),
            NodeTestAnnotations { cap_results_length: Some(1), ignored_properties: vec!["etag".into()] },
        )]);
        let value = snapshot_value(
            &result(vec![json!({ "id": 1, "etag": "x" }), json!({ "id": 2, "etag": "y" })]),
            &annotations,
            false,
        );
        assert_eq!(value, json!({ "Feed": [[{ "id": 1 }]] }));
    }

    #[test]
    fn shallow_collapses_nested_fields() {
        let value = snapshot_value(
            &result(vec![json!({ "id": 1, "tags": ["a"], "owner": { "name": "n" } })]),
            &WorkflowAnnotations::new(),
            true,
        );
        assert_eq!(
            value,
            json!({ "Feed": [[{ "id": 1, "tags": ARRAY_SENTINEL, "owner": OBJECT_SENTINEL }]] })
        );
    }
}

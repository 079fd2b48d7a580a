//! Per-node test annotations read from node notes.
//!
//! A node's free-text notes may carry lines of the form
//!
//! ```text
//! CAP_RESULTS_LENGTH=3
//! IGNORED_PROPERTIES=updatedAt,etag
//! ```
//!
//! They are parsed once when the batch is built. Other note lines are
//! ignored.

use std::collections::BTreeMap;

use engine::Workflow;

use crate::BatchError;

const CAP_RESULTS_LENGTH: &str = "CAP_RESULTS_LENGTH=";
const IGNORED_PROPERTIES: &str = "IGNORED_PROPERTIES=";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTestAnnotations {
    /// Keep at most this many output items.
    pub cap_results_length: Option<usize>,
    /// Keys dropped from every output item.
    pub ignored_properties: Vec<String>,
}

impl NodeTestAnnotations {
    pub fn parse(node: &str, notes: &str) -> Result<Self, BatchError> {
        let invalid = |reason: String| BatchError::InvalidAnnotation { node: node.to_owned(), reason };
        let mut annotations = Self::default();

        for line in notes.lines().map(str::trim) {
            if let Some(raw) = line.strip_prefix(CAP_RESULTS_LENGTH) {
                let cap = raw
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| invalid(format!("{CAP_RESULTS_LENGTH}{raw}: {e}")))?;
                annotations.cap_results_length = Some(cap);
            } else if let Some(raw) = line.strip_prefix(IGNORED_PROPERTIES) {
                let properties: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_owned)
                    .collect();
                if properties.is_empty() {
                    return Err(invalid(format!("{IGNORED_PROPERTIES} lists no properties")));
                }
                annotations.ignored_properties.extend(properties);
            }
        }
        Ok(annotations)
    }

    pub fn is_empty(&self) -> bool {
        self.cap_results_length.is_none() && self.ignored_properties.is_empty()
    }
}

/// Annotations of every node that has any, keyed by node name.
pub type WorkflowAnnotations = BTreeMap<String, NodeTestAnnotations>;

pub fn workflow_annotations(workflow: &Workflow) -> Result<WorkflowAnnotations, BatchError> {
    let mut annotations = WorkflowAnnotations::new();
    for node in &workflow.nodes {
        let Some(notes) = node.notes.as_deref() else {
            continue;
        };
        let parsed = NodeTestAnnotations::parse(&node.name, notes)?;
        if !parsed.is_empty() {
            annotations.insert(node.name.clone(), parsed);
        }
    }
    Ok(annotations)
}

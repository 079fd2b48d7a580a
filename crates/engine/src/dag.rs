//! Graph validation and execution planning — run this before executing a
//! workflow.
//!
//! Rules enforced:
//! 1. Node names must be unique within the workflow.
//! 2. Every connection must reference existing nodes (both ends).
//! 3. The directed graph must be acyclic (topological sort must succeed).
//!
//! Ties in the topological order are broken by declaration order so the
//! same workflow always runs its nodes in the same sequence.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{models::Workflow, EngineError};

/// Validate the workflow graph and return every node name in topological
/// execution order.
///
/// # Errors
/// - [`EngineError::DuplicateNodeName`] if two nodes share a name.
/// - [`EngineError::UnknownNodeReference`] if a connection references a missing node.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn validate_dag(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node names are unique
    // -----------------------------------------------------------------------
    let mut seen: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.name.as_str()) {
            return Err(EngineError::DuplicateNodeName(node.name.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate connection endpoints
    // -----------------------------------------------------------------------
    for (from, targets) in &workflow.connections {
        if !seen.contains(from.as_str()) {
            return Err(EngineError::UnknownNodeReference { node: from.clone(), side: "from" });
        }
        for target in targets {
            if !seen.contains(target.node.as_str()) {
                return Err(EngineError::UnknownNodeReference {
                    node: target.node.clone(),
                    side: "to",
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut in_degree: HashMap<&str, usize> =
        workflow.nodes.iter().map(|n| (n.name.as_str(), 0)).collect();
    for targets in workflow.connections.values() {
        for target in targets {
            *in_degree.entry(target.node.as_str()).or_insert(0) += 1;
        }
    }

    // Seed in declaration order.
    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.name.as_str())
        .filter(|name| in_degree[name] == 0)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(workflow.nodes.len());

    while let Some(name) = queue.pop_front() {
        sorted.push(name.to_owned());

        if let Some(targets) = workflow.connections.get(name) {
            for target in targets {
                if let Some(deg) = in_degree.get_mut(target.node.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(target.node.as_str());
                    }
                }
            }
        }
    }

    // If we didn't visit every node the graph contains a cycle.
    if sorted.len() != workflow.nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

/// The ordered list of nodes one run should execute, plus the nodes that
/// receive the trigger input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub order: Vec<String>,
    pub start_nodes: Vec<String>,
}

/// Plan a run: nodes reachable from `start_nodes` (all root nodes when
/// empty), cut down to the ancestors of `destination` when one is given.
pub fn execution_plan(
    workflow: &Workflow,
    start_nodes: &[String],
    destination: Option<&str>,
) -> Result<ExecutionPlan, EngineError> {
    let sorted = validate_dag(workflow)?;

    for name in start_nodes.iter().map(String::as_str).chain(destination) {
        if workflow.node(name).is_none() {
            return Err(EngineError::UnknownNode(name.to_owned()));
        }
    }

    let starts: Vec<String> = if start_nodes.is_empty() {
        sorted
            .iter()
            .filter(|name| workflow.parents(name).is_empty())
            .cloned()
            .collect()
    } else {
        start_nodes.to_vec()
    };

    // Forward reachability from the start nodes.
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = starts.iter().map(String::as_str).collect();
    while let Some(name) = stack.pop() {
        if !reachable.insert(name) {
            continue;
        }
        if let Some(targets) = workflow.connections.get(name) {
            stack.extend(targets.iter().map(|t| t.node.as_str()));
        }
    }

    // Backward reachability from the destination.
    let ancestors: Option<HashSet<&str>> = destination.map(|dest| {
        let mut seen = HashSet::new();
        let mut stack = vec![dest];
        while let Some(name) = stack.pop() {
            if seen.insert(name) {
                stack.extend(workflow.parents(name));
            }
        }
        seen
    });

    let order = sorted
        .into_iter()
        .filter(|name| reachable.contains(name.as_str()))
        .filter(|name| ancestors.as_ref().map_or(true, |a| a.contains(name.as_str())))
        .collect();

    Ok(ExecutionPlan { order, start_nodes: starts })
}

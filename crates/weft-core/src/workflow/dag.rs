//! Dependency graph analysis: cycle detection and wave computation.
//!
//! Uses `petgraph` to model task dependencies as a directed graph. The
//! scheduler itself never precomputes waves (it works from a ready set), but
//! waves are what `weft plan` shows, and cycle detection names the offending
//! task when an execution turns out to be unschedulable.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use weft_types::workflow::WorkflowTask;

/// Errors from graph analysis.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    #[error("cycle detected involving task '{0}'")]
    Cycle(String),
}

/// Build a graph with an edge from each dependency to its dependent.
fn build_graph(tasks: &[WorkflowTask]) -> Result<DiGraph<&str, ()>, DagError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let id_to_node: HashMap<&str, NodeIndex> = tasks
        .iter()
        .map(|t| (t.id.as_str(), graph.add_node(t.id.as_str())))
        .collect();

    for task in tasks {
        let to = id_to_node[task.id.as_str()];
        for dep in &task.depends_on {
            let from = id_to_node
                .get(dep.as_str())
                .ok_or_else(|| DagError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                })?;
            graph.add_edge(*from, to, ());
        }
    }

    Ok(graph)
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Return the ID of a task lying on a dependency cycle, if any.
///
/// Dependencies on undeclared tasks are ignored here.
pub fn find_cycle(tasks: &[WorkflowTask]) -> Option<String> {
    let mut graph = DiGraph::<&str, ()>::new();
    let id_to_node: HashMap<&str, NodeIndex> = tasks
        .iter()
        .map(|t| (t.id.as_str(), graph.add_node(t.id.as_str())))
        .collect();
    for task in tasks {
        for dep in &task.depends_on {
            if let Some(from) = id_to_node.get(dep.as_str()) {
                graph.add_edge(*from, id_to_node[task.id.as_str()], ());
            }
        }
    }

    toposort(&graph, None)
        .err()
        .map(|cycle| graph[cycle.node_id()].to_string())
}

// ---------------------------------------------------------------------------
// Execution plan (wave computation)
// ---------------------------------------------------------------------------

/// Group tasks into waves by dependency depth.
///
/// Wave 0 holds tasks with no dependencies; every other task sits one wave
/// after its deepest dependency. Tasks keep declaration order within a wave.
pub fn build_execution_plan(tasks: &[WorkflowTask]) -> Result<Vec<Vec<&WorkflowTask>>, DagError> {
    if tasks.is_empty() {
        return Ok(vec![]);
    }

    let graph = build_graph(tasks)?;
    let sorted = toposort(&graph, None)
        .map_err(|cycle| DagError::Cycle(graph[cycle.node_id()].to_string()))?;

    let by_id: HashMap<&str, &WorkflowTask> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node in sorted {
        let task_id = graph[node];
        let depth = by_id[task_id]
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(task_id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&WorkflowTask>> = vec![vec![]; max_depth + 1];
    for task in tasks {
        waves[depths[task.id.as_str()]].push(task);
    }

    Ok(waves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

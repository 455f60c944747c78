//! Execution state types for weft.
//!
//! A `WorkflowExecution` is one run of a `WorkflowDefinition`. It owns one
//! `TaskExecution` per top-level task plus the runtime variable map that tasks
//! read from and write their outputs into.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::WorkflowDefinition;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Status of a single task within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Whether a dependent task may run after this one.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task Execution
// ---------------------------------------------------------------------------

/// Runtime record of one top-level task within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task_id: String,
    pub status: TaskStatus,
    /// Set when the first attempt starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock seconds between `start_time` and `end_time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempt number (1-based, 0 until the task first runs).
    #[serde(default)]
    pub attempt: u32,
    /// Variables written by this task's output mapping.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, Value>,
}

impl TaskExecution {
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
            duration: None,
            result: None,
            error: None,
            attempt: 0,
            outputs: HashMap::new(),
        }
    }

    /// Move to a terminal status, stamping `end_time` and `duration`.
    pub fn finish(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(now);
        self.duration = self.start_time.map(|start| seconds_between(start, now));
    }
}

// ---------------------------------------------------------------------------
// Workflow Execution
// ---------------------------------------------------------------------------

/// One run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    /// Keyed by task ID, one entry per top-level task.
    pub task_executions: HashMap<String, TaskExecution>,
    /// Runtime variables: seeded from defaults and caller input, extended by task outputs.
    pub variables: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// Build a PENDING execution with one PENDING task record per top-level task.
    pub fn new(
        execution_id: impl Into<String>,
        definition: &WorkflowDefinition,
        variables: HashMap<String, Value>,
    ) -> Self {
        let task_executions = definition
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskExecution::pending(t.id.clone())))
            .collect();

        Self {
            execution_id: execution_id.into(),
            workflow_name: definition.name.clone(),
            status: ExecutionStatus::Pending,
            task_executions,
            variables,
            start_time: None,
            end_time: None,
            duration: None,
            error: None,
        }
    }

    /// Move to a terminal status, stamping `end_time` and `duration`.
    pub fn finish(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(now);
        self.duration = self.start_time.map(|start| seconds_between(start, now));
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.task_executions.get(task_id).map(|t| t.status)
    }

    /// Compute the status summary returned by status queries.
    pub fn summary(&self) -> ExecutionSummary {
        let mut summary = ExecutionSummary {
            execution_id: self.execution_id.clone(),
            workflow_name: self.workflow_name.clone(),
            status: self.status,
            progress: 0.0,
            total_tasks: self.task_executions.len(),
            pending: 0,
            running: 0,
            success: 0,
            failed: 0,
            skipped: 0,
            cancelled: 0,
            running_tasks: Vec::new(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration: self.duration,
            error: self.error.clone(),
        };

        for task in self.task_executions.values() {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => {
                    summary.running += 1;
                    summary.running_tasks.push(task.task_id.clone());
                }
                TaskStatus::Success => summary.success += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Skipped => summary.skipped += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary.running_tasks.sort();

        if summary.total_tasks > 0 {
            let done = summary.total_tasks - summary.pending - summary.running;
            summary.progress = done as f64 * 100.0 / summary.total_tasks as f64;
        }

        summary
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Point-in-time status of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    /// Percentage (0-100) of tasks in a terminal state.
    pub progress: f64,
    pub total_tasks: usize,
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// IDs of currently running tasks, sorted.
    pub running_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filter for listing executions. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    pub fn workflow(name: impl Into<String>) -> Self {
        Self {
            workflow_name: Some(name.into()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, execution: &WorkflowExecution) -> bool {
        let name_matches = self
            .workflow_name
            .as_ref()
            .is_none_or(|name| &execution.workflow_name == name);
        let status_matches = self.status.is_none_or(|status| execution.status == status);
        name_matches && status_matches
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{TaskType, WorkflowTask};
    use chrono::Duration;

    fn definition() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("wf");
        def.tasks = vec![
            WorkflowTask::new("a", TaskType::Delay),
            WorkflowTask::new("b", TaskType::Delay),
            WorkflowTask::new("c", TaskType::Delay),
            WorkflowTask::new("d", TaskType::Delay),
        ];
        def
    }

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(serde_json::to_string(&TaskStatus::Cancelled).unwrap(), "\"cancelled\"");
        assert_eq!(serde_json::to_string(&ExecutionStatus::Success).unwrap(), "\"success\"");
        let parsed: TaskStatus = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(parsed, TaskStatus::Skipped);
    }

    #[test]
    fn test_terminal_and_dependency_satisfaction() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(TaskStatus::Success.satisfies_dependency());
        assert!(TaskStatus::Skipped.satisfies_dependency());
        assert!(!TaskStatus::Failed.satisfies_dependency());
        assert!(!TaskStatus::Cancelled.satisfies_dependency());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_execution_is_pending_per_task() {
        let exec = WorkflowExecution::new("run-1", &definition(), HashMap::new());
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.task_executions.len(), 4);
        assert!(
            exec.task_executions
                .values()
                .all(|t| t.status == TaskStatus::Pending && t.attempt == 0)
        );
    }

    #[test]
    fn test_summary_counts_and_progress() {
        let mut exec = WorkflowExecution::new("run-1", &definition(), HashMap::new());
        exec.status = ExecutionStatus::Running;
        exec.task_executions.get_mut("a").unwrap().status = TaskStatus::Success;
        exec.task_executions.get_mut("b").unwrap().status = TaskStatus::Running;
        exec.task_executions.get_mut("c").unwrap().status = TaskStatus::Skipped;

        let summary = exec.summary();
        assert_eq!(summary.total_tasks, 4);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.running_tasks, vec!["b".to_string()]);
        assert!((summary.progress - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_finish_sets_duration() {
        let mut task = TaskExecution::pending("a");
        let start = Utc::now();
        task.start_time = Some(start);
        task.finish(TaskStatus::Success, start + Duration::milliseconds(1500));
        assert_eq!(task.status, TaskStatus::Success);
        assert!((task.duration.unwrap() - 1.5).abs() < 1e-9);

        let mut never_started = TaskExecution::pending("b");
        never_started.finish(TaskStatus::Skipped, Utc::now());
        assert!(never_started.end_time.is_some());
        assert!(never_started.duration.is_none());
    }

    #[test]
    fn test_filter_matches() {
        let mut exec = WorkflowExecution::new("run-1", &definition(), HashMap::new());
        exec.status = ExecutionStatus::Failed;

        assert!(ExecutionFilter::default().matches(&exec));
        assert!(ExecutionFilter::workflow("wf").matches(&exec));
        assert!(!ExecutionFilter::workflow("other").matches(&exec));
        assert!(
            ExecutionFilter::workflow("wf")
                .with_status(ExecutionStatus::Failed)
                .matches(&exec)
        );
        assert!(
            !ExecutionFilter::default()
                .with_status(ExecutionStatus::Success)
                .matches(&exec)
        );
    }
}

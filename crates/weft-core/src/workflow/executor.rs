//! Workflow executor: ready-set DAG scheduling with bounded concurrency.
//!
//! The `DagExecutor` drives one execution from PENDING to a terminal status.
//! Instead of precomputing waves it repeatedly derives the set of ready tasks
//! from the current task statuses, so a task starts as soon as its own
//! dependencies are done rather than when a whole wave finishes.
//!
//! # Execution flow
//!
//! 1. Mark the execution RUNNING.
//! 2. Under the execution lock, skip tasks whose dependencies failed or whose
//!    condition is false, repeating until no more skips happen.
//! 3. Spawn ready tasks into a `JoinSet`, up to `max_parallel_tasks` at once.
//! 4. Wait for one task to finish, for cancellation, or for the workflow
//!    deadline, then go back to 2.
//! 5. Resolve the final status and stamp `end_time`.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use weft_types::event::EngineEvent;
use weft_types::execution::{ExecutionStatus, TaskStatus};
use weft_types::workflow::WorkflowDefinition;

use crate::event::EventBus;

use super::condition::ConditionEvaluator;
use super::context::ExecutionState;
use super::dag::find_cycle;
use super::runner::TaskRunner;
use super::step_runner::TaskScope;

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Execution-level failures, recorded on the execution as its error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Tasks remain but none can ever become ready.
    #[error("unresolvable dependency graph: {0}")]
    Unschedulable(String),

    #[error("workflow timed out after {secs}s")]
    WorkflowTimeout { secs: u64 },

    /// A spawned task unit ended without reporting a status.
    #[error("task join error: {0}")]
    Join(String),
}

// ---------------------------------------------------------------------------
// DagExecutor
// ---------------------------------------------------------------------------

/// Scheduling loop for a single execution.
#[derive(Clone)]
pub struct DagExecutor {
    runner: TaskRunner,
    events: EventBus,
    conditions: ConditionEvaluator,
}

/// Result of one readiness pass.
struct ReadySet {
    ready: Vec<usize>,
    /// PENDING tasks that are neither ready nor running.
    blocked: Vec<String>,
}

impl DagExecutor {
    pub fn new(runner: TaskRunner, events: EventBus) -> Self {
        Self {
            runner,
            events,
            conditions: ConditionEvaluator::new(),
        }
    }

    /// Run the execution in `scope` to completion and return its final status.
    ///
    /// The execution's `TaskExecution` records must already exist. Cancelling
    /// `cancel` stops new dispatch; tasks already running finish first.
    pub async fn execute(
        &self,
        definition: Arc<WorkflowDefinition>,
        scope: TaskScope,
        cancel: CancellationToken,
    ) -> ExecutionStatus {
        let started = Instant::now();
        {
            let mut state = scope.state.write().await;
            if state.execution.status == ExecutionStatus::Pending {
                state.execution.status = ExecutionStatus::Running;
            }
            state.execution.start_time.get_or_insert_with(Utc::now);
        }

        tracing::info!(
            execution_id = scope.execution_id.as_str(),
            workflow = definition.name.as_str(),
            tasks = definition.tasks.len(),
            max_parallel_tasks = definition.parallelism(),
            "starting workflow execution"
        );
        self.events.publish(EngineEvent::ExecutionStarted {
            execution_id: scope.execution_id.clone(),
            workflow_name: definition.name.clone(),
        });

        // A timeout too far out to represent as an `Instant` means no deadline.
        let deadline = definition.timeout_secs.and_then(|secs| {
            started
                .checked_add(Duration::from_secs(secs))
                .map(|at| (secs, at))
        });

        let failure = self
            .schedule(&definition, &scope, &cancel, deadline)
            .await
            .err();

        let status = self.finish(&scope, failure).await;
        tracing::info!(
            execution_id = scope.execution_id.as_str(),
            workflow = definition.name.as_str(),
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workflow execution finished"
        );
        status
    }

    /// The ready-set loop. Returns an error for unschedulable graphs and timeouts.
    async fn schedule(
        &self,
        definition: &Arc<WorkflowDefinition>,
        scope: &TaskScope,
        cancel: &CancellationToken,
        deadline: Option<(u64, Instant)>,
    ) -> Result<(), ExecutorError> {
        let parallelism = definition.parallelism();
        let mut join_set: JoinSet<(String, TaskStatus)> = JoinSet::new();
        let mut running: HashSet<String> = HashSet::new();

        loop {
            if cancel.is_cancelled() {
                return self.drain_cancelled(scope, &mut join_set).await;
            }

            let ReadySet { ready, blocked } = {
                let mut state = scope.state.write().await;
                if state.execution.status == ExecutionStatus::Cancelled {
                    drop(state);
                    return self.drain_cancelled(scope, &mut join_set).await;
                }
                self.collect_ready(definition, &mut state, &running)
            };

            if ready.is_empty() && running.is_empty() {
                if blocked.is_empty() {
                    return Ok(());
                }
                return Err(self.unschedulable(definition, scope, blocked).await);
            }

            let slots = parallelism.saturating_sub(running.len());
            for idx in ready.into_iter().take(slots) {
                let task_id = definition.tasks[idx].id.clone();
                tracing::debug!(
                    execution_id = scope.execution_id.as_str(),
                    task_id = task_id.as_str(),
                    running = running.len(),
                    "dispatching task"
                );
                running.insert(task_id);
                self.spawn_task(&mut join_set, Arc::clone(definition), idx, scope, cancel);
            }

            let timeout = async {
                match deadline {
                    Some((_, at)) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                joined = join_set.join_next() => {
                    match joined {
                        Some(Ok((task_id, status))) => {
                            tracing::debug!(
                                execution_id = scope.execution_id.as_str(),
                                task_id = task_id.as_str(),
                                status = %status,
                                "task finished"
                            );
                            running.remove(&task_id);
                        }
                        Some(Err(err)) => return Err(ExecutorError::Join(err.to_string())),
                        None => running.clear(),
                    }
                }
                _ = cancel.cancelled() => {
                    return self.drain_cancelled(scope, &mut join_set).await;
                }
                _ = timeout => {
                    let secs = deadline.map(|(secs, _)| secs).unwrap_or_default();
                    join_set.shutdown().await;
                    self.cancel_unfinished(scope, "workflow timed out").await;
                    return Err(ExecutorError::WorkflowTimeout { secs });
                }
            }
        }
    }

    /// Apply dependency and condition skips, then report what can run now.
    ///
    /// Runs to a fixpoint: a skip can make other tasks ready or skippable.
    fn collect_ready(
        &self,
        definition: &WorkflowDefinition,
        state: &mut ExecutionState,
        running: &HashSet<String>,
    ) -> ReadySet {
        loop {
            let vars = state.snapshot();
            let mut skipped: Vec<(usize, Option<String>, String)> = Vec::new();
            let mut ready = Vec::new();
            let mut blocked = Vec::new();

            for (idx, task) in definition.tasks.iter().enumerate() {
                if running.contains(&task.id)
                    || state.execution.task_status(&task.id) != Some(TaskStatus::Pending)
                {
                    continue;
                }

                let mut waiting = false;
                let mut failed_dep = None;
                for dep in &task.depends_on {
                    match state.execution.task_status(dep) {
                        Some(s) if s.satisfies_dependency() => {}
                        Some(TaskStatus::Failed | TaskStatus::Cancelled) => {
                            failed_dep = Some(dep.clone());
                            break;
                        }
                        _ => waiting = true,
                    }
                }

                if let Some(dep) = failed_dep {
                    let error = format!("dependency '{dep}' did not succeed");
                    skipped.push((idx, Some(error.clone()), error));
                } else if waiting {
                    blocked.push(task.id.clone());
                } else if task
                    .condition
                    .as_ref()
                    .is_some_and(|c| !self.conditions.evaluate(c, &vars))
                {
                    skipped.push((idx, None, "condition evaluated to false".to_string()));
                } else {
                    ready.push(idx);
                }
            }

            if skipped.is_empty() {
                return ReadySet { ready, blocked };
            }

            let now = Utc::now();
            for (idx, error, reason) in skipped {
                let task_id = &definition.tasks[idx].id;
                if let Some(record) = state.execution.task_executions.get_mut(task_id) {
                    record.error = error;
                    record.finish(TaskStatus::Skipped, now);
                }
                tracing::warn!(
                    execution_id = state.execution.execution_id.as_str(),
                    task_id = task_id.as_str(),
                    reason = reason.as_str(),
                    "task skipped"
                );
                self.events.publish(EngineEvent::TaskSkipped {
                    execution_id: state.execution.execution_id.clone(),
                    task_id: task_id.clone(),
                    reason,
                });
            }
        }
    }

    fn spawn_task(
        &self,
        join_set: &mut JoinSet<(String, TaskStatus)>,
        definition: Arc<WorkflowDefinition>,
        idx: usize,
        scope: &TaskScope,
        cancel: &CancellationToken,
    ) {
        let runner = self.runner.clone();
        let scope = scope.clone();
        let token = cancel.clone();

        join_set.spawn(async move {
            let task = &definition.tasks[idx];
            let status = match AssertUnwindSafe(runner.run(task, &scope, &token))
                .catch_unwind()
                .await
            {
                Ok(status) => status,
                Err(_) => {
                    tracing::error!(
                        execution_id = scope.execution_id.as_str(),
                        task_id = task.id.as_str(),
                        "task panicked"
                    );
                    let mut state = scope.state.write().await;
                    if let Some(record) = state.execution.task_executions.get_mut(&task.id) {
                        record.error = Some("task panicked".to_string());
                        record.finish(TaskStatus::Failed, Utc::now());
                    }
                    TaskStatus::Failed
                }
            };
            (task.id.clone(), status)
        });
    }

    /// Cancel pending tasks, then let running ones finish.
    async fn drain_cancelled(
        &self,
        scope: &TaskScope,
        join_set: &mut JoinSet<(String, TaskStatus)>,
    ) -> Result<(), ExecutorError> {
        tracing::info!(
            execution_id = scope.execution_id.as_str(),
            running = join_set.len(),
            "cancellation observed, draining running tasks"
        );
        self.cancel_pending(scope).await;
        while let Some(joined) = join_set.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(
                    execution_id = scope.execution_id.as_str(),
                    error = %err,
                    "task unit ended abnormally during drain"
                );
            }
        }
        Ok(())
    }

    /// Mark the execution and its PENDING tasks CANCELLED.
    async fn cancel_pending(&self, scope: &TaskScope) {
        let mut state = scope.state.write().await;
        if !state.execution.status.is_terminal() {
            state.execution.status = ExecutionStatus::Cancelled;
        }
        let now = Utc::now();
        for record in state.execution.task_executions.values_mut() {
            if record.status == TaskStatus::Pending {
                record.finish(TaskStatus::Cancelled, now);
            }
        }
    }

    /// Mark every PENDING or RUNNING task CANCELLED.
    async fn cancel_unfinished(&self, scope: &TaskScope, reason: &str) {
        let mut state = scope.state.write().await;
        let now = Utc::now();
        for record in state.execution.task_executions.values_mut() {
            if !record.status.is_terminal() {
                record.error = Some(reason.to_string());
                record.finish(TaskStatus::Cancelled, now);
            }
        }
    }

    async fn unschedulable(
        &self,
        definition: &WorkflowDefinition,
        scope: &TaskScope,
        blocked: Vec<String>,
    ) -> ExecutorError {
        let detail = match find_cycle(&definition.tasks) {
            Some(task_id) => format!("cycle detected involving task '{task_id}'"),
            None => format!("tasks can never become ready: {}", blocked.join(", ")),
        };
        tracing::error!(
            execution_id = scope.execution_id.as_str(),
            blocked = blocked.len(),
            detail = detail.as_str(),
            "unschedulable workflow"
        );
        self.cancel_unfinished(scope, "unresolvable dependency graph")
            .await;
        ExecutorError::Unschedulable(detail)
    }

    /// Decide the terminal status, stamp it, and publish `ExecutionFinished`.
    async fn finish(&self, scope: &TaskScope, failure: Option<ExecutorError>) -> ExecutionStatus {
        let mut state = scope.state.write().await;
        let execution = &mut state.execution;

        let mut failed: Vec<&str> = execution
            .task_executions
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.task_id.as_str())
            .collect();
        failed.sort_unstable();

        let (status, error) = if execution.status == ExecutionStatus::Cancelled {
            (ExecutionStatus::Cancelled, Some("execution cancelled".to_string()))
        } else if let Some(err) = failure {
            (ExecutionStatus::Failed, Some(err.to_string()))
        } else if !failed.is_empty() {
            (
                ExecutionStatus::Failed,
                Some(format!("tasks failed: {}", failed.join(", "))),
            )
        } else {
            (ExecutionStatus::Success, None)
        };

        execution.error = error;
        execution.finish(status, Utc::now());
        let duration_ms = execution
            .duration
            .map(|d| (d * 1000.0).round() as u64)
            .unwrap_or(0);

        self.events.publish(EngineEvent::ExecutionFinished {
            execution_id: execution.execution_id.clone(),
            status,
            duration_ms,
        });
        status
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};
    use tokio::sync::RwLock;
    use weft_types::execution::WorkflowExecution;
    use weft_types::workflow::{TaskCondition, TaskType, WorkflowTask};

    use crate::workflow::functions::FunctionRegistry;
    use crate::workflow::invoker::{UnconfiguredAgentInvoker, UnconfiguredToolInvoker};
    use crate::workflow::step_runner::StepRunner;

    fn executor(functions: FunctionRegistry) -> DagExecutor {
        let steps = StepRunner::new(
            Arc::new(UnconfiguredAgentInvoker),
            Arc::new(UnconfiguredToolInvoker),
            Arc::new(functions),
        );
        let events = EventBus::new(256);
        DagExecutor::new(TaskRunner::new(Arc::new(steps), events.clone()), events)
    }

    fn basic_functions() -> FunctionRegistry {
        let functions = FunctionRegistry::new();
        functions.register("ok", |_| Ok::<_, String>(json!("done")));
        functions.register("fail", |_| Err::<Value, _>("boom".to_string()));
        functions.register("set_flag", |_| Ok::<_, String>(json!({"flag": true})));
        functions
    }

    fn prepare(tasks: Vec<WorkflowTask>) -> (Arc<WorkflowDefinition>, TaskScope) {
        let mut def = WorkflowDefinition::new("wf");
        def.tasks = tasks;
        let exec = WorkflowExecution::new("run-1", &def, HashMap::new());
        let scope = TaskScope {
            execution_id: "run-1".into(),
            workflow_name: "wf".into(),
            state: Arc::new(RwLock::new(ExecutionState::new(exec))),
        };
        (Arc::new(def), scope)
    }

    async fn status_of(scope: &TaskScope, id: &str) -> TaskStatus {
        scope.state.read().await.execution.task_executions[id].status
    }

    #[tokio::test]
    async fn test_linear_chain_succeeds() {
        let (def, scope) = prepare(vec![
            WorkflowTask::function("a", "ok"),
            WorkflowTask::function("b", "ok").with_depends_on(&["a"]),
            WorkflowTask::function("c", "ok").with_depends_on(&["b"]),
        ]);
        let status = executor(basic_functions())
            .execute(def, scope.clone(), CancellationToken::new())
            .await;

        assert_eq!(status, ExecutionStatus::Success);
        let state = scope.state.read().await;
        assert!(state.execution.error.is_none());
        assert!(state.execution.end_time.is_some());
        let a_end = state.execution.task_executions["a"].end_time.unwrap();
        let b_start = state.execution.task_executions["b"].start_time.unwrap();
        assert!(a_end <= b_start);
    }

    #[tokio::test]
    async fn test_failure_skips_direct_dependents_only() {
        let (def, scope) = prepare(vec![
            WorkflowTask::function("bad", "fail"),
            WorkflowTask::function("child", "ok").with_depends_on(&["bad"]),
            WorkflowTask::function("grandchild", "ok").with_depends_on(&["child"]),
            WorkflowTask::function("independent", "ok"),
        ]);
        let status = executor(basic_functions())
            .execute(def, scope.clone(), CancellationToken::new())
            .await;

        assert_eq!(status, ExecutionStatus::Failed);
        assert_eq!(status_of(&scope, "bad").await, TaskStatus::Failed);
        assert_eq!(status_of(&scope, "child").await, TaskStatus::Skipped);
        assert_eq!(status_of(&scope, "grandchild").await, TaskStatus::Success);
        assert_eq!(status_of(&scope, "independent").await, TaskStatus::Success);

        let state = scope.state.read().await;
        assert_eq!(
            state.execution.task_executions["child"].error.as_deref(),
            Some("dependency 'bad' did not succeed")
        );
        assert_eq!(state.execution.error.as_deref(), Some("tasks failed: bad"));
    }

    #[tokio::test]
    async fn test_false_condition_skips_without_running() {
        let (def, scope) = prepare(vec![
            WorkflowTask::function("gated", "ok")
                .with_condition(TaskCondition::equals("flag", json!(true))),
            WorkflowTask::function("after", "ok").with_depends_on(&["gated"]),
        ]);
        let exec = executor(basic_functions());
        let mut events = exec.events.subscribe();
        let status = exec.execute(def, scope.clone(), CancellationToken::new()).await;

        assert_eq!(status, ExecutionStatus::Success);
        let state = scope.state.read().await;
        let gated = &state.execution.task_executions["gated"];
        assert_eq!(gated.status, TaskStatus::Skipped);
        assert_eq!(gated.attempt, 0);
        assert!(gated.start_time.is_none());
        assert_eq!(state.execution.task_executions["after"].status, TaskStatus::Success);

        while let Ok(event) = events.try_recv() {
            if let EngineEvent::TaskStarted { task_id, .. } = event {
                assert_ne!(task_id, "gated");
            }
        }
    }

    #[tokio::test]
    async fn test_cycle_is_unschedulable() {
        let (def, scope) = prepare(vec![
            WorkflowTask::function("root", "ok"),
            WorkflowTask::function("x", "ok").with_depends_on(&["y"]),
            WorkflowTask::function("y", "ok").with_depends_on(&["x"]),
        ]);
        let status = executor(basic_functions())
            .execute(def, scope.clone(), CancellationToken::new())
            .await;

        assert_eq!(status, ExecutionStatus::Failed);
        assert_eq!(status_of(&scope, "root").await, TaskStatus::Success);
        assert_eq!(status_of(&scope, "x").await, TaskStatus::Cancelled);
        assert_eq!(status_of(&scope, "y").await, TaskStatus::Cancelled);
        let state = scope.state.read().await;
        let error = state.execution.error.as_deref().unwrap();
        assert!(error.starts_with("unresolvable dependency graph"), "got: {error}");
        assert!(error.contains("cycle"), "got: {error}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallelism_cap_respected() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let functions = FunctionRegistry::new();
        {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            functions.register_async("work", move |_| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(Value::Null)
                }
            });
        }

        let tasks = (0..5)
            .map(|i| WorkflowTask::function(format!("t{i}"), "work"))
            .collect();
        let (def, scope) = prepare(tasks);
        let mut def = (*def).clone();
        def.max_parallel_tasks = 2;

        let status = executor(functions)
            .execute(Arc::new(def), scope, CancellationToken::new())
            .await;
        assert_eq!(status, ExecutionStatus::Success);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_timeout_fails_execution() {
        let (def, scope) = prepare(vec![
            WorkflowTask::new("slow", TaskType::Delay).with_parameter("seconds", json!(30)),
            WorkflowTask::function("after", "ok").with_depends_on(&["slow"]),
        ]);
        let mut def = (*def).clone();
        def.timeout_secs = Some(2);

        let status = executor(basic_functions())
            .execute(Arc::new(def), scope.clone(), CancellationToken::new())
            .await;

        assert_eq!(status, ExecutionStatus::Failed);
        assert_eq!(status_of(&scope, "slow").await, TaskStatus::Cancelled);
        assert_eq!(status_of(&scope, "after").await, TaskStatus::Cancelled);
        let state = scope.state.read().await;
        assert_eq!(
            state.execution.error.as_deref(),
            Some("workflow timed out after 2s")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_drains_and_cancels_pending() {
        let (def, scope) = prepare(vec![
            WorkflowTask::new("slow", TaskType::Delay).with_parameter("seconds", json!(5)),
            WorkflowTask::function("after", "ok").with_depends_on(&["slow"]),
        ]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let status = executor(basic_functions())
            .execute(def, scope.clone(), cancel)
            .await;

        assert_eq!(status, ExecutionStatus::Cancelled);
        assert_eq!(status_of(&scope, "slow").await, TaskStatus::Success);
        assert_eq!(status_of(&scope, "after").await, TaskStatus::Cancelled);
    }

    #[test]
    fn test_executor_error_display() {
        assert_eq!(
            ExecutorError::WorkflowTimeout { secs: 5 }.to_string(),
            "workflow timed out after 5s"
        );
        assert_eq!(
            ExecutorError::Unschedulable("cycle detected involving task 'a'".into()).to_string(),
            "unresolvable dependency graph: cycle detected involving task 'a'"
        );
    }
}

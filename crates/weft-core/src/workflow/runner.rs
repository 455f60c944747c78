//! Task runner: drives one top-level task through its attempts.
//!
//! Each attempt starts under the execution lock (so a cancelled execution
//! never gets a new RUNNING task), runs the type executor against a fresh
//! variable snapshot, and records the outcome. Failed attempts back off
//! according to the task's retry policy; successful ones publish their
//! mapped outputs into the shared variables.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use weft_types::event::EngineEvent;
use weft_types::execution::TaskStatus;
use weft_types::workflow::WorkflowTask;

use crate::event::EventBus;

use super::context::VariableSnapshot;
use super::retry::RetryController;
use super::step_runner::{StepRunner, TaskScope, map_outputs};

/// Runs a single top-level task with retries and status bookkeeping.
#[derive(Clone)]
pub struct TaskRunner {
    steps: Arc<StepRunner>,
    events: EventBus,
}

impl TaskRunner {
    pub fn new(steps: Arc<StepRunner>, events: EventBus) -> Self {
        Self { steps, events }
    }

    pub fn steps(&self) -> &StepRunner {
        &self.steps
    }

    /// Run `task` to a terminal status and return that status.
    ///
    /// The task's `TaskExecution` must already exist in the scope's state.
    pub async fn run(
        &self,
        task: &WorkflowTask,
        scope: &TaskScope,
        cancel: &CancellationToken,
    ) -> TaskStatus {
        let mut retry = RetryController::new(task.retry.as_ref());
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let Some(vars) = self.begin_attempt(task, scope, cancel, attempt).await else {
                return TaskStatus::Cancelled;
            };

            self.events.publish(EngineEvent::TaskStarted {
                execution_id: scope.execution_id.clone(),
                task_id: task.id.clone(),
                attempt,
            });
            tracing::debug!(
                execution_id = scope.execution_id.as_str(),
                task_id = task.id.as_str(),
                attempt,
                "task attempt started"
            );

            let outcome = self.steps.run_with_timeout(task, scope, &vars).await;

            match outcome {
                Ok(result) => {
                    let outputs = map_outputs(task, &result);
                    let mut state = scope.state.write().await;
                    for (name, value) in &outputs {
                        state.write_variable(&task.id, name, value.clone());
                    }

                    let mut duration_ms = 0;
                    if let Some(record) = state.execution.task_executions.get_mut(&task.id) {
                        record.result = Some(result);
                        record.error = None;
                        record.outputs.extend(outputs);
                        record.finish(TaskStatus::Success, Utc::now());
                        duration_ms = millis(record.duration);
                    }
                    drop(state);

                    tracing::info!(
                        execution_id = scope.execution_id.as_str(),
                        task_id = task.id.as_str(),
                        attempt,
                        "task succeeded"
                    );
                    self.events.publish(EngineEvent::TaskSucceeded {
                        execution_id: scope.execution_id.clone(),
                        task_id: task.id.clone(),
                        duration_ms,
                    });
                    return TaskStatus::Success;
                }
                Err(err) => {
                    let error = err.to_string();
                    let retrying = retry.should_retry(attempt);

                    {
                        let mut state = scope.state.write().await;
                        if let Some(record) = state.execution.task_executions.get_mut(&task.id) {
                            record.error = Some(error.clone());
                            if !retrying {
                                record.finish(TaskStatus::Failed, Utc::now());
                            }
                        }
                    }

                    if !retrying {
                        tracing::error!(
                            execution_id = scope.execution_id.as_str(),
                            task_id = task.id.as_str(),
                            attempt,
                            error = error.as_str(),
                            "task failed"
                        );
                        self.events.publish(EngineEvent::TaskFailed {
                            execution_id: scope.execution_id.clone(),
                            task_id: task.id.clone(),
                            error,
                        });
                        return TaskStatus::Failed;
                    }

                    let delay = retry.next_delay();
                    tracing::warn!(
                        execution_id = scope.execution_id.as_str(),
                        task_id = task.id.as_str(),
                        attempt,
                        max_attempts = retry.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = error.as_str(),
                        "task attempt failed, retrying"
                    );
                    self.events.publish(EngineEvent::TaskRetrying {
                        execution_id: scope.execution_id.clone(),
                        task_id: task.id.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error,
                    });

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }
    }

    /// Move the task to RUNNING unless the execution has already ended.
    ///
    /// Returns the variable snapshot for the attempt, or `None` when the task
    /// was marked CANCELLED instead.
    async fn begin_attempt(
        &self,
        task: &WorkflowTask,
        scope: &TaskScope,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Option<VariableSnapshot> {
        let mut state = scope.state.write().await;
        let stopped = cancel.is_cancelled() || state.execution.status.is_terminal();
        let now = Utc::now();

        let record = state.execution.task_executions.get_mut(&task.id)?;
        if stopped {
            record.error.get_or_insert_with(|| "execution cancelled".to_string());
            record.finish(TaskStatus::Cancelled, now);
            tracing::debug!(
                execution_id = scope.execution_id.as_str(),
                task_id = task.id.as_str(),
                "task cancelled before attempt"
            );
            return None;
        }

        record.status = TaskStatus::Running;
        record.attempt = attempt;
        record.start_time.get_or_insert(now);
        Some(state.snapshot())
    }
}

fn millis(duration_secs: Option<f64>) -> u64 {
    duration_secs.map(|d| (d * 1000.0).round() as u64).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::{Value, json};
    use tokio::sync::RwLock;
    use weft_types::execution::{ExecutionStatus, WorkflowExecution};
    use weft_types::workflow::{TaskRetry, WorkflowDefinition};

    use crate::workflow::context::ExecutionState;
    use crate::workflow::functions::FunctionRegistry;
    use crate::workflow::invoker::{UnconfiguredAgentInvoker, UnconfiguredToolInvoker};

    fn setup(tasks: Vec<WorkflowTask>, functions: FunctionRegistry) -> (TaskRunner, TaskScope) {
        let mut def = WorkflowDefinition::new("wf");
        def.tasks = tasks;
        let mut exec = WorkflowExecution::new("run-1", &def, HashMap::new());
        exec.status = ExecutionStatus::Running;

        let steps = StepRunner::new(
            Arc::new(UnconfiguredAgentInvoker),
            Arc::new(UnconfiguredToolInvoker),
            Arc::new(functions),
        );
        let runner = TaskRunner::new(Arc::new(steps), EventBus::new(64));
        let scope = TaskScope {
            execution_id: "run-1".into(),
            workflow_name: "wf".into(),
            state: Arc::new(RwLock::new(ExecutionState::new(exec))),
        };
        (runner, scope)
    }

    fn fast_retry(max_attempts: u32) -> TaskRetry {
        TaskRetry {
            max_attempts,
            delay_seconds: 0.01,
            backoff_multiplier: 2.0,
            max_delay_seconds: 0.05,
        }
    }

    #[tokio::test]
    async fn success_writes_outputs_and_result() {
        let functions = FunctionRegistry::new();
        functions.register("answer", |_| Ok::<_, String>(json!({"result": 42})));
        let task = WorkflowTask::function("a", "answer").with_output("result", "x");
        let (runner, scope) = setup(vec![task.clone()], functions);

        let status = runner.run(&task, &scope, &CancellationToken::new()).await;
        assert_eq!(status, TaskStatus::Success);

        let state = scope.state.read().await;
        assert_eq!(state.execution.variables["x"], json!(42));
        let record = &state.execution.task_executions["a"];
        assert_eq!(record.status, TaskStatus::Success);
        assert_eq!(record.attempt, 1);
        assert_eq!(record.result, Some(json!({"result": 42})));
        assert_eq!(record.outputs["x"], json!(42));
        assert!(record.end_time.is_some());
        assert!(record.duration.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_task_uses_all_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let functions = FunctionRegistry::new();
        functions.register("flaky", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Value, _>("always broken".to_string())
        });
        let task = WorkflowTask::function("f", "flaky").with_retry(fast_retry(3));
        let (runner, scope) = setup(vec![task.clone()], functions);
        let mut events = runner.events.subscribe();

        let status = runner.run(&task, &scope, &CancellationToken::new()).await;
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let state = scope.state.read().await;
        let record = &state.execution.task_executions["f"];
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.attempt, 3);
        assert!(record.error.as_deref().unwrap().contains("always broken"));

        let mut retries = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::TaskRetrying { .. }) {
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let functions = FunctionRegistry::new();
        functions.register("second_time", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("transient".to_string())
            } else {
                Ok(json!("ok"))
            }
        });
        let task = WorkflowTask::function("t", "second_time").with_retry(fast_retry(3));
        let (runner, scope) = setup(vec![task.clone()], functions);

        let status = runner.run(&task, &scope, &CancellationToken::new()).await;
        assert_eq!(status, TaskStatus::Success);

        let state = scope.state.read().await;
        let record = &state.execution.task_executions["t"];
        assert_eq!(record.attempt, 2);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn cancelled_execution_never_starts_task() {
        let functions = FunctionRegistry::new();
        functions.register("answer", |_| Ok::<_, String>(json!(1)));
        let task = WorkflowTask::function("a", "answer");
        let (runner, scope) = setup(vec![task.clone()], functions);
        scope.state.write().await.execution.status = ExecutionStatus::Cancelled;

        let status = runner.run(&task, &scope, &CancellationToken::new()).await;
        assert_eq!(status, TaskStatus::Cancelled);

        let state = scope.state.read().await;
        let record = &state.execution.task_executions["a"];
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.attempt, 0);
        assert!(record.start_time.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retries() {
        let functions = FunctionRegistry::new();
        functions.register("broken", |_| Err::<Value, _>("nope".to_string()));
        let mut retry = fast_retry(5);
        retry.delay_seconds = 30.0;
        retry.max_delay_seconds = 30.0;
        let task = WorkflowTask::function("b", "broken").with_retry(retry);
        let (runner, scope) = setup(vec![task.clone()], functions);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let status = runner.run(&task, &scope, &cancel).await;
        assert_eq!(status, TaskStatus::Cancelled);
        assert_eq!(scope.state.read().await.execution.task_executions["b"].attempt, 1);
    }
}

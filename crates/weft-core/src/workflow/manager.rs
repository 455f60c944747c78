//! Execution lifecycle: start, query, cancel, wait, and evict.
//!
//! The manager tracks every execution by ID. Each entry owns the execution's
//! shared state, its cancellation token (a child of the engine's root token),
//! and a watch channel that flips to `true` once the executor has stamped a
//! terminal status.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use weft_types::execution::{
    ExecutionFilter, ExecutionStatus, ExecutionSummary, TaskStatus, WorkflowExecution,
};
use weft_types::workflow::WorkflowDefinition;

use super::context::{ExecutionState, SharedState};
use super::definition::DefinitionError;
use super::executor::DagExecutor;
use super::registry::WorkflowRegistry;
use super::step_runner::TaskScope;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow '{0}' is not registered")]
    WorkflowNotFound(String),

    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),

    #[error("execution '{0}' already exists")]
    DuplicateExecution(String),

    /// A required variable has no default and was not supplied.
    #[error("workflow '{workflow}' requires variable '{variable}'")]
    MissingVariable { workflow: String, variable: String },

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

// ---------------------------------------------------------------------------
// ExecutionManager
// ---------------------------------------------------------------------------

struct ExecutionHandle {
    state: SharedState,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Tracks executions and spawns their executors on the engine's tracker.
pub struct ExecutionManager {
    workflows: Arc<WorkflowRegistry>,
    executor: DagExecutor,
    executions: DashMap<String, Arc<ExecutionHandle>>,
    tracker: TaskTracker,
    root: CancellationToken,
}

impl ExecutionManager {
    pub fn new(
        workflows: Arc<WorkflowRegistry>,
        executor: DagExecutor,
        tracker: TaskTracker,
        root: CancellationToken,
    ) -> Self {
        Self {
            workflows,
            executor,
            executions: DashMap::new(),
            tracker,
            root,
        }
    }

    /// Start an execution of the named workflow and return its ID.
    ///
    /// Returns as soon as the executor is spawned. When `execution_id` is
    /// `None` a time-ordered UUID is generated.
    pub fn execute(
        &self,
        workflow_name: &str,
        variables: HashMap<String, Value>,
        execution_id: Option<String>,
    ) -> Result<String, EngineError> {
        let definition = self
            .workflows
            .get(workflow_name)
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_name.to_string()))?;
        let variables = seed_variables(&definition, variables)?;
        let execution_id = execution_id.unwrap_or_else(|| Uuid::now_v7().to_string());

        let execution = WorkflowExecution::new(&execution_id, &definition, variables);
        let state: SharedState = Arc::new(RwLock::new(ExecutionState::new(execution)));
        let cancel = self.root.child_token();
        let (done_tx, done_rx) = watch::channel(false);

        match self.executions.entry(execution_id.clone()) {
            Entry::Occupied(_) => return Err(EngineError::DuplicateExecution(execution_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(ExecutionHandle {
                    state: Arc::clone(&state),
                    cancel: cancel.clone(),
                    done: done_rx,
                }));
            }
        }

        tracing::info!(
            execution_id = execution_id.as_str(),
            workflow = workflow_name,
            "execution submitted"
        );

        let executor = self.executor.clone();
        let scope = TaskScope {
            execution_id: execution_id.clone(),
            workflow_name: definition.name.clone(),
            state: Arc::clone(&state),
        };
        self.tracker.spawn(async move {
            let driven = AssertUnwindSafe(executor.execute(definition, scope, cancel))
                .catch_unwind()
                .await;
            if driven.is_err() {
                fail_abandoned(&state).await;
            }
            let _ = done_tx.send(true);
        });

        Ok(execution_id)
    }

    fn handle(&self, execution_id: &str) -> Option<Arc<ExecutionHandle>> {
        self.executions
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of an execution, if it is still tracked.
    pub async fn get(&self, execution_id: &str) -> Option<WorkflowExecution> {
        let handle = self.handle(execution_id)?;
        let state = handle.state.read().await;
        Some(state.execution.clone())
    }

    pub async fn status(&self, execution_id: &str) -> Result<ExecutionSummary, EngineError> {
        let handle = self
            .handle(execution_id)
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;
        let state = handle.state.read().await;
        Ok(state.execution.summary())
    }

    /// Request cancellation of a RUNNING execution.
    ///
    /// Returns `true` only for the call that moved the execution to
    /// CANCELLED. Tasks already running finish; nothing new starts.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let Some(handle) = self.handle(execution_id) else {
            return false;
        };

        {
            let mut state = handle.state.write().await;
            if state.execution.status != ExecutionStatus::Running {
                return false;
            }
            state.execution.status = ExecutionStatus::Cancelled;
        }
        handle.cancel.cancel();

        tracing::info!(execution_id, "execution cancellation requested");
        true
    }

    /// Snapshots of tracked executions matching `filter`, oldest first.
    pub async fn list(&self, filter: &ExecutionFilter) -> Vec<WorkflowExecution> {
        let handles: Vec<Arc<ExecutionHandle>> = self
            .executions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut executions = Vec::with_capacity(handles.len());
        for handle in handles {
            let state = handle.state.read().await;
            if filter.matches(&state.execution) {
                executions.push(state.execution.clone());
            }
        }
        executions.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.execution_id.cmp(&b.execution_id))
        });
        executions
    }

    /// Wait for an execution to reach a terminal status and return it.
    pub async fn wait(&self, execution_id: &str) -> Result<WorkflowExecution, EngineError> {
        let handle = self
            .handle(execution_id)
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;

        let mut done = handle.done.clone();
        if done.wait_for(|finished| *finished).await.is_err() {
            tracing::warn!(execution_id, "executor ended without signalling completion");
        }

        let state = handle.state.read().await;
        Ok(state.execution.clone())
    }

    /// Drop terminal executions whose `end_time` is at least `older_than` ago.
    ///
    /// Returns how many were removed.
    pub async fn evict_terminal(&self, older_than: Duration) -> usize {
        let Some(cutoff) = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let handles: Vec<(String, Arc<ExecutionHandle>)> = self
            .executions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut evicted = 0;
        for (execution_id, handle) in handles {
            let expired = {
                let state = handle.state.read().await;
                state.execution.status.is_terminal()
                    && state.execution.end_time.is_some_and(|end| end <= cutoff)
            };
            if expired && self.executions.remove(&execution_id).is_some() {
                tracing::debug!(execution_id = execution_id.as_str(), "evicted finished execution");
                evicted += 1;
            }
        }
        evicted
    }

    /// Number of tracked executions, finished or not.
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

/// Stamp FAILED on an execution whose executor panicked before finishing.
///
/// Unfinished tasks become CANCELLED so the execution is fully terminal and
/// eligible for eviction.
async fn fail_abandoned(state: &SharedState) {
    let mut state = state.write().await;
    let now = Utc::now();
    let execution = &mut state.execution;
    tracing::error!(
        execution_id = execution.execution_id.as_str(),
        "workflow executor panicked"
    );
    for record in execution.task_executions.values_mut() {
        if !record.status.is_terminal() {
            record.error = Some("workflow executor panicked".to_string());
            record.finish(TaskStatus::Cancelled, now);
        }
    }
    if !execution.status.is_terminal() {
        execution.error = Some("workflow executor panicked".to_string());
        execution.finish(ExecutionStatus::Failed, now);
    }
}

/// Seed runtime variables from declared defaults, then caller overrides.
fn seed_variables(
    definition: &WorkflowDefinition,
    overrides: HashMap<String, Value>,
) -> Result<HashMap<String, Value>, EngineError> {
    let mut variables = HashMap::with_capacity(definition.variables.len() + overrides.len());
    for var in &definition.variables {
        match &var.default {
            Some(default) => {
                variables.insert(var.name.clone(), default.clone());
            }
            None if var.required && !overrides.contains_key(&var.name) => {
                return Err(EngineError::MissingVariable {
                    workflow: definition.name.clone(),
                    variable: var.name.clone(),
                });
            }
            None => {}
        }
    }
    variables.extend(overrides);
    Ok(variables)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

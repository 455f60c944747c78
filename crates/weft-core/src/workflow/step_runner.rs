//! Type executors for all seven task types.
//!
//! `StepRunner` runs exactly one attempt of a task: it resolves the task's
//! parameters against a variable snapshot, dispatches on `TaskType`, and
//! returns the JSON result. Retries, status bookkeeping and output mapping for
//! top-level tasks belong to the task runner; group tasks (`parallel`,
//! `sequential`) recurse back into `StepRunner` for their nested tasks.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{Value, json};
use thiserror::Error;
use weft_types::workflow::{TaskCondition, TaskType, WorkflowTask};

use super::condition::ConditionEvaluator;
use super::context::{SharedState, VariableSnapshot, value_to_string};
use super::functions::FunctionRegistry;
use super::invoker::{AgentInvoker, BoxFuture, InvokerError, ToolInvoker};
use super::resolver::resolve_parameters;

// ---------------------------------------------------------------------------
// TaskExecutionError
// ---------------------------------------------------------------------------

/// Failure of a single task attempt.
#[derive(Debug, Error)]
pub enum TaskExecutionError {
    /// The task is missing configuration its type requires.
    #[error("invalid task '{task_id}': {reason}")]
    InvalidTask { task_id: String, reason: String },

    /// The agent or tool invoker reported an error.
    #[error("invoker error: {0}")]
    Invoker(#[from] InvokerError),

    #[error("function '{0}' is not registered")]
    FunctionNotFound(String),

    /// A registered function returned an error.
    #[error("function '{name}' failed: {message}")]
    Function { name: String, message: String },

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// A nested task of a group failed.
    #[error("nested task '{task_id}' failed: {source}")]
    Nested {
        task_id: String,
        source: Box<TaskExecutionError>,
    },
}

impl TaskExecutionError {
    fn invalid(task: &WorkflowTask, reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            task_id: task.id.clone(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskScope
// ---------------------------------------------------------------------------

/// The execution a task attempt belongs to.
#[derive(Clone)]
pub struct TaskScope {
    pub execution_id: String,
    pub workflow_name: String,
    /// Shared state, used by group tasks to publish nested outputs.
    pub state: SharedState,
}

impl TaskScope {
    /// Write a task's mapped outputs into the shared variables.
    pub async fn write_outputs(&self, task_id: &str, outputs: &[(String, Value)]) {
        if outputs.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for (name, value) in outputs {
            state.write_variable(task_id, name, value.clone());
        }
    }
}

/// Apply a task's `outputs` mapping to its result.
///
/// For each `(result_key, variable)` pair the variable receives
/// `result[result_key]` when the result is an object holding that key, and
/// the whole result otherwise. Pairs are returned sorted by variable name.
pub fn map_outputs(task: &WorkflowTask, result: &Value) -> Vec<(String, Value)> {
    let mut mapped: Vec<(String, Value)> = task
        .outputs
        .iter()
        .map(|(key, variable)| {
            let value = match result {
                Value::Object(map) if map.contains_key(key) => map[key].clone(),
                whole => whole.clone(),
            };
            (variable.clone(), value)
        })
        .collect();
    mapped.sort_by(|a, b| a.0.cmp(&b.0));
    mapped
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Dispatches one task attempt to its type executor.
pub struct StepRunner {
    agents: Arc<dyn AgentInvoker>,
    tools: Arc<dyn ToolInvoker>,
    functions: Arc<FunctionRegistry>,
    conditions: ConditionEvaluator,
    default_timeout_secs: Option<u64>,
}

impl StepRunner {
    pub fn new(
        agents: Arc<dyn AgentInvoker>,
        tools: Arc<dyn ToolInvoker>,
        functions: Arc<FunctionRegistry>,
    ) -> Self {
        Self {
            agents,
            tools,
            functions,
            conditions: ConditionEvaluator::new(),
            default_timeout_secs: None,
        }
    }

    /// Timeout applied to tasks that declare none.
    pub fn with_default_timeout(mut self, secs: Option<u64>) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Effective per-attempt timeout for a task.
    pub fn timeout_for(&self, task: &WorkflowTask) -> Option<u64> {
        task.timeout_secs.or(self.default_timeout_secs)
    }

    pub fn conditions(&self) -> &ConditionEvaluator {
        &self.conditions
    }

    /// Run one attempt of `task`, bounded by its effective timeout.
    pub async fn run_with_timeout(
        &self,
        task: &WorkflowTask,
        scope: &TaskScope,
        vars: &VariableSnapshot,
    ) -> Result<Value, TaskExecutionError> {
        match self.timeout_for(task) {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.run(task, scope, vars))
                .await
                .map_err(|_| TaskExecutionError::Timeout { secs })?,
            None => self.run(task, scope, vars).await,
        }
    }

    /// Run one attempt of `task` without a timeout.
    ///
    /// Boxed so that group tasks can recurse.
    pub fn run<'a>(
        &'a self,
        task: &'a WorkflowTask,
        scope: &'a TaskScope,
        vars: &'a VariableSnapshot,
    ) -> BoxFuture<'a, Result<Value, TaskExecutionError>> {
        Box::pin(async move {
            match task.task_type {
                TaskType::Agent => self.run_agent(task, scope, vars).await,
                TaskType::McpTool => self.run_tool(task, vars).await,
                TaskType::Function => self.run_function(task, vars).await,
                TaskType::Condition => self.run_condition(task, vars),
                TaskType::Parallel => self.run_parallel(task, scope, vars).await,
                TaskType::Sequential => self.run_sequential(task, scope, vars).await,
                TaskType::Delay => self.run_delay(task, vars).await,
            }
        })
    }

    // -- Agent: one message to a named agent, reply as a string --

    async fn run_agent(
        &self,
        task: &WorkflowTask,
        scope: &TaskScope,
        vars: &VariableSnapshot,
    ) -> Result<Value, TaskExecutionError> {
        let agent = task
            .agent
            .as_deref()
            .ok_or_else(|| TaskExecutionError::invalid(task, "agent task has no 'agent'"))?;
        let parameters = resolve_parameters(&task.parameters, vars);

        let message = parameters
            .get("message")
            .or_else(|| parameters.get("prompt"))
            .map(value_to_string)
            .unwrap_or_else(|| Value::Object(parameters.clone()).to_string());

        let context = json!({
            "execution_id": scope.execution_id,
            "workflow_name": scope.workflow_name,
            "task_id": task.id,
            "parameters": parameters,
        });

        tracing::debug!(task_id = task.id.as_str(), agent, "invoking agent");
        let reply = self.agents.invoke(agent, &message, context).await?;
        Ok(Value::String(reply))
    }

    // -- Tool: structured call to a named external tool --

    async fn run_tool(
        &self,
        task: &WorkflowTask,
        vars: &VariableSnapshot,
    ) -> Result<Value, TaskExecutionError> {
        let tool = task
            .tool
            .as_deref()
            .ok_or_else(|| TaskExecutionError::invalid(task, "mcp_tool task has no 'tool'"))?;
        let arguments = Value::Object(resolve_parameters(&task.parameters, vars));

        tracing::debug!(task_id = task.id.as_str(), tool, "calling tool");
        Ok(self.tools.call(tool, arguments).await?)
    }

    // -- Function: registered host callable --

    async fn run_function(
        &self,
        task: &WorkflowTask,
        vars: &VariableSnapshot,
    ) -> Result<Value, TaskExecutionError> {
        let name = task
            .function
            .as_deref()
            .ok_or_else(|| TaskExecutionError::invalid(task, "function task has no 'function'"))?;
        let function = self
            .functions
            .resolve(name)
            .ok_or_else(|| TaskExecutionError::FunctionNotFound(name.to_string()))?;

        let args = resolve_parameters(&task.parameters, vars);
        function
            .call(args)
            .await
            .map_err(|e| TaskExecutionError::Function {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    // -- Condition: evaluate the task's own condition tree --

    fn run_condition(
        &self,
        task: &WorkflowTask,
        vars: &VariableSnapshot,
    ) -> Result<Value, TaskExecutionError> {
        let condition = match (&task.condition, task.parameters.get("condition")) {
            (Some(condition), _) => condition.clone(),
            (None, Some(raw)) => serde_json::from_value::<TaskCondition>(raw.clone()).map_err(|e| {
                TaskExecutionError::invalid(task, format!("invalid parameters.condition: {e}"))
            })?,
            (None, None) => {
                return Err(TaskExecutionError::invalid(
                    task,
                    "condition task has no condition",
                ));
            }
        };

        let result = self.conditions.evaluate(&condition, vars);
        Ok(json!({ "result": result }))
    }

    // -- Parallel: fan out nested tasks, capture each outcome --

    async fn run_parallel(
        &self,
        task: &WorkflowTask,
        scope: &TaskScope,
        vars: &VariableSnapshot,
    ) -> Result<Value, TaskExecutionError> {
        let outcomes = join_all(
            task.tasks
                .iter()
                .map(|nested| self.run_nested(nested, scope, vars)),
        )
        .await;

        let mut entries = Vec::with_capacity(outcomes.len());
        for (nested, outcome) in task.tasks.iter().zip(outcomes) {
            let entry = match outcome {
                Ok(Some(result)) => {
                    scope
                        .write_outputs(&nested.id, &map_outputs(nested, &result))
                        .await;
                    json!({ "task_id": nested.id, "status": "success", "result": result })
                }
                Ok(None) => skipped_entry(nested),
                Err(err) => {
                    tracing::warn!(
                        task_id = task.id.as_str(),
                        nested_task_id = nested.id.as_str(),
                        error = %err,
                        "nested parallel task failed"
                    );
                    json!({ "task_id": nested.id, "status": "failed", "error": err.to_string() })
                }
            };
            entries.push(entry);
        }

        Ok(Value::Array(entries))
    }

    // -- Sequential: nested tasks in order, first failure aborts --

    async fn run_sequential(
        &self,
        task: &WorkflowTask,
        scope: &TaskScope,
        vars: &VariableSnapshot,
    ) -> Result<Value, TaskExecutionError> {
        let mut local = vars.clone().into_inner();
        let mut results = Vec::with_capacity(task.tasks.len());

        for nested in &task.tasks {
            let snapshot = VariableSnapshot::new(local.clone());
            match self.run_nested(nested, scope, &snapshot).await {
                Ok(Some(result)) => {
                    let outputs = map_outputs(nested, &result);
                    scope.write_outputs(&nested.id, &outputs).await;
                    local.extend(outputs);
                    results.push(result);
                }
                Ok(None) => results.push(skipped_entry(nested)),
                Err(err) => {
                    return Err(TaskExecutionError::Nested {
                        task_id: nested.id.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }

        Ok(Value::Array(results))
    }

    /// Run a nested task once. `None` means its condition was false.
    async fn run_nested(
        &self,
        nested: &WorkflowTask,
        scope: &TaskScope,
        vars: &VariableSnapshot,
    ) -> Result<Option<Value>, TaskExecutionError> {
        if let Some(condition) = &nested.condition {
            if !self.conditions.evaluate(condition, vars) {
                tracing::debug!(task_id = nested.id.as_str(), "nested task skipped by condition");
                return Ok(None);
            }
        }
        self.run_with_timeout(nested, scope, vars).await.map(Some)
    }

    // -- Delay: sleep for parameters.seconds --

    async fn run_delay(
        &self,
        task: &WorkflowTask,
        vars: &VariableSnapshot,
    ) -> Result<Value, TaskExecutionError> {
        let parameters = resolve_parameters(&task.parameters, vars);
        let seconds = match parameters.get("seconds") {
            None | Some(Value::Null) => 0.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
                TaskExecutionError::invalid(task, format!("delay seconds '{s}' is not a number"))
            })?,
            Some(other) => {
                return Err(TaskExecutionError::invalid(
                    task,
                    format!("delay seconds must be a number, got {other}"),
                ));
            }
        };
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let delay = Duration::try_from_secs_f64(seconds).map_err(|_| {
            TaskExecutionError::invalid(task, format!("delay of {seconds} seconds is out of range"))
        })?;

        tokio::time::sleep(delay).await;
        Ok(json!({ "delay_seconds": seconds }))
    }
}

fn skipped_entry(task: &WorkflowTask) -> Value {
    json!({ "task_id": task.id, "status": "skipped" })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

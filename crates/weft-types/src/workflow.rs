//! Workflow definition types for weft.
//!
//! `WorkflowDefinition` is the canonical, immutable description of a workflow:
//! its variables, its task DAG, and its scheduling limits. YAML and JSON files
//! both deserialize straight into it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// Default number of tasks that may run concurrently within one execution.
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 10;

/// The canonical workflow definition.
///
/// Stored by name in the workflow registry and shared immutably with every
/// execution created from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Registry key.
    pub name: String,
    /// Free-form version string (e.g. "1.0").
    #[serde(default = "default_version")]
    pub version: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared variables, used to seed the runtime variable map.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<WorkflowVariable>,
    /// Top-level tasks forming the workflow DAG.
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
    /// Workflow-level timeout in seconds.
    #[serde(
        default,
        rename = "timeout",
        alias = "timeout_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_secs: Option<u64>,
    /// Maximum number of tasks running at once within one execution.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    /// Extensible metadata, carried but never interpreted by the engine.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_max_parallel_tasks() -> usize {
    DEFAULT_MAX_PARALLEL_TASKS
}

impl WorkflowDefinition {
    /// Create an empty definition with default limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: None,
            variables: Vec::new(),
            tasks: Vec::new(),
            timeout_secs: None,
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
            metadata: HashMap::new(),
        }
    }

    /// Look up a top-level task by ID.
    pub fn task(&self, id: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Effective concurrency bound. A configured value of 0 is treated as 1.
    pub fn parallelism(&self) -> usize {
        self.max_parallel_tasks.max(1)
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A declared workflow variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVariable {
    /// Variable name, unique within a definition.
    pub name: String,
    /// Declared semantic type. Advisory only; values are never coerced.
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    /// Value used when the caller does not supply one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Whether the caller must supply a value when there is no default.
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared type of a workflow variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
    Object,
    Array,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Comparison or logical operator of a `TaskCondition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    #[serde(alias = "EQUALS")]
    Equals,
    #[serde(alias = "NOT_EQUALS")]
    NotEquals,
    #[serde(alias = "GREATER_THAN")]
    GreaterThan,
    #[serde(alias = "LESS_THAN")]
    LessThan,
    #[serde(alias = "CONTAINS")]
    Contains,
    #[serde(alias = "EXISTS")]
    Exists,
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "OR")]
    Or,
    #[serde(alias = "NOT")]
    Not,
}

/// A recursive boolean condition over runtime variables.
///
/// Comparison operators read `variable` and `value`; `and`/`or`/`not` read
/// the nested `conditions`.
///
/// ```yaml
/// condition:
///   operator: and
///   conditions:
///     - { variable: flag, operator: equals, value: true }
///     - { variable: score, operator: greater_than, value: 0.5 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TaskCondition>,
}

impl TaskCondition {
    /// Build a comparison condition (`equals`, `greater_than`, ...).
    pub fn compare(variable: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            variable: Some(variable.into()),
            operator,
            value: Some(value),
            conditions: Vec::new(),
        }
    }

    pub fn equals(variable: impl Into<String>, value: Value) -> Self {
        Self::compare(variable, ConditionOperator::Equals, value)
    }

    pub fn exists(variable: impl Into<String>) -> Self {
        Self {
            variable: Some(variable.into()),
            operator: ConditionOperator::Exists,
            value: None,
            conditions: Vec::new(),
        }
    }

    /// Build a logical condition (`and`, `or`, `not`) over nested conditions.
    pub fn logical(operator: ConditionOperator, conditions: Vec<TaskCondition>) -> Self {
        Self {
            variable: None,
            operator,
            value: None,
            conditions,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Retry policy for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRetry {
    /// Total attempts including the first one (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds (default 1.0).
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,
    /// Factor applied to the delay after each retry (default 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound for the delay, in seconds (default 60.0).
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_seconds() -> f64 {
    1.0
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_seconds() -> f64 {
    60.0
}

impl Default for TaskRetry {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_seconds: default_delay_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_seconds: default_max_delay_seconds(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// The kind of a task. Drives executor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(alias = "AGENT")]
    Agent,
    #[serde(alias = "MCP_TOOL")]
    McpTool,
    #[serde(alias = "FUNCTION")]
    Function,
    #[serde(alias = "CONDITION")]
    Condition,
    #[serde(alias = "PARALLEL")]
    Parallel,
    #[serde(alias = "SEQUENTIAL")]
    Sequential,
    #[serde(alias = "DELAY")]
    Delay,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Agent => "agent",
            TaskType::McpTool => "mcp_tool",
            TaskType::Function => "function",
            TaskType::Condition => "condition",
            TaskType::Parallel => "parallel",
            TaskType::Sequential => "sequential",
            TaskType::Delay => "delay",
        }
    }

    /// Whether this type carries nested `tasks`.
    pub fn is_group(&self) -> bool {
        matches!(self, TaskType::Parallel | TaskType::Sequential)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task in the workflow DAG (or nested inside a group task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Task ID, unique within its definition.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Agent name (for `agent` tasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Tool name (for `mcp_tool` tasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Registered function name (for `function` tasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Templated parameters, resolved against runtime variables before use.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    /// IDs of tasks that must succeed (or be skipped) first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Gate evaluated right before dispatch; false means the task is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<TaskCondition>,
    /// Per-attempt timeout in seconds.
    #[serde(
        default,
        rename = "timeout",
        alias = "timeout_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<TaskRetry>,
    /// Nested tasks (for `parallel` and `sequential` tasks).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<WorkflowTask>,
    /// Result key -> runtime variable name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, String>,
}

impl WorkflowTask {
    /// Create a task with no parameters, dependencies, or policies.
    pub fn new(id: impl Into<String>, task_type: TaskType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            task_type,
            agent: None,
            tool: None,
            function: None,
            parameters: Map::new(),
            depends_on: Vec::new(),
            condition: None,
            timeout_secs: None,
            retry: None,
            tasks: Vec::new(),
            outputs: HashMap::new(),
        }
    }

    /// Shorthand for a `function` task calling `function`.
    pub fn function(id: impl Into<String>, function: impl Into<String>) -> Self {
        let mut task = Self::new(id, TaskType::Function);
        task.function = Some(function.into());
        task
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_condition(mut self, condition: TaskCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retry(mut self, retry: TaskRetry) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_output(mut self, result_key: impl Into<String>, variable: impl Into<String>) -> Self {
        self.outputs.insert(result_key.into(), variable.into());
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<WorkflowTask>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Display name, falling back to the ID when no name was given.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

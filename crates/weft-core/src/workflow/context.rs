//! Runtime variable state for a workflow execution.
//!
//! `ExecutionState` is the mutable record that lives behind an execution's
//! lock: the `WorkflowExecution` itself plus a map of which task last wrote
//! each variable. Tasks never read it directly; they receive an immutable
//! `VariableSnapshot` taken at dispatch time.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use weft_types::execution::WorkflowExecution;

/// Execution state shared between the scheduler and its running tasks.
pub type SharedState = Arc<RwLock<ExecutionState>>;

// ---------------------------------------------------------------------------
// VariableSnapshot
// ---------------------------------------------------------------------------

/// Owned, read-only copy of the runtime variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSnapshot {
    variables: HashMap<String, Value>,
}

impl VariableSnapshot {
    pub fn new(variables: HashMap<String, Value>) -> Self {
        Self { variables }
    }

    /// Look up a variable by name.
    ///
    /// An exact top-level key wins. Otherwise a dotted name such as
    /// `result.status` walks into nested objects (and arrays, for numeric
    /// segments).
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.variables.get(name) {
            return Some(value);
        }

        let mut segments = name.split('.');
        let mut current = self.variables.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.variables
    }
}

impl From<HashMap<String, Value>> for VariableSnapshot {
    fn from(variables: HashMap<String, Value>) -> Self {
        Self::new(variables)
    }
}

/// Render a JSON value for textual substitution: strings raw, everything
/// else as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

/// Mutable state of one execution, guarded by the execution's `RwLock`.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub execution: WorkflowExecution,
    /// Variable name -> ID of the task that last wrote it.
    writers: HashMap<String, String>,
}

impl ExecutionState {
    pub fn new(execution: WorkflowExecution) -> Self {
        Self {
            execution,
            writers: HashMap::new(),
        }
    }

    /// Copy the current variables for a task to read.
    pub fn snapshot(&self) -> VariableSnapshot {
        VariableSnapshot::new(self.execution.variables.clone())
    }

    /// Write a task output into the shared variables.
    ///
    /// Last writer wins. Overwriting a value that another task of this run
    /// wrote is logged.
    pub fn write_variable(&mut self, task_id: &str, name: &str, value: Value) {
        let overwritten = self
            .writers
            .get(name)
            .filter(|previous| previous.as_str() != task_id);
        if let Some(previous) = overwritten {
            tracing::warn!(
                execution_id = self.execution.execution_id.as_str(),
                variable = name,
                previous_writer = previous.as_str(),
                writer = task_id,
                "variable overwritten by a different task"
            );
        }
        self.writers.insert(name.to_string(), task_id.to_string());
        self.execution.variables.insert(name.to_string(), value);
    }

    pub fn last_writer(&self, name: &str) -> Option<&str> {
        self.writers.get(name).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_types::workflow::{WorkflowDefinition, WorkflowTask};

    fn snapshot(value: Value) -> VariableSnapshot {
        let map: HashMap<String, Value> = serde_json::from_value(value).unwrap();
        VariableSnapshot::new(map)
    }

    #[test]
    fn test_lookup_exact_key() {
        let vars = snapshot(json!({"topic": "rust", "a.b": 1}));
        assert_eq!(vars.lookup("topic"), Some(&json!("rust")));
        assert_eq!(vars.lookup("a.b"), Some(&json!(1)));
        assert!(vars.lookup("missing").is_none());
    }

    #[test]
    fn test_lookup_dotted_path() {
        let vars = snapshot(json!({
            "result": {"status": "ok", "items": [10, 20]}
        }));
        assert_eq!(vars.lookup("result.status"), Some(&json!("ok")));
        assert_eq!(vars.lookup("result.items.1"), Some(&json!(20)));
        assert!(vars.lookup("result.items.9").is_none());
        assert!(vars.lookup("result.status.deeper").is_none());
        assert!(vars.contains("result"));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("raw")), "raw");
        assert_eq!(value_to_string(&json!(42)), "42");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&json!({"k": [1, 2]})), r#"{"k":[1,2]}"#);
        assert_eq!(value_to_string(&Value::Null), "null");
    }

    #[test]
    fn test_write_variable_tracks_last_writer() {
        let mut def = WorkflowDefinition::new("wf");
        def.tasks = vec![WorkflowTask::function("a", "echo")];
        let exec = WorkflowExecution::new("run-1", &def, HashMap::new());
        let mut state = ExecutionState::new(exec);

        state.write_variable("a", "shared", json!(1));
        state.write_variable("b", "shared", json!(2));

        assert_eq!(state.execution.variables["shared"], json!(2));
        assert_eq!(state.last_writer("shared"), Some("b"));

        let snap = state.snapshot();
        state.write_variable("a", "shared", json!(3));
        assert_eq!(snap.lookup("shared"), Some(&json!(2)));
    }
}

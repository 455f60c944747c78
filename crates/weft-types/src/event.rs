//! Event types for the weft engine event bus.
//!
//! `EngineEvent` is broadcast at every execution and task lifecycle
//! transition. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels.

use serde::{Deserialize, Serialize};

use crate::execution::ExecutionStatus;

/// Lifecycle events emitted while executions run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The DAG executor picked up an execution.
    ExecutionStarted {
        execution_id: String,
        workflow_name: String,
    },

    /// A task attempt began.
    TaskStarted {
        execution_id: String,
        task_id: String,
        attempt: u32,
    },

    /// A task attempt failed and another attempt is scheduled after `delay_ms`.
    TaskRetrying {
        execution_id: String,
        task_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    TaskSucceeded {
        execution_id: String,
        task_id: String,
        duration_ms: u64,
    },

    /// A task exhausted its attempts.
    TaskFailed {
        execution_id: String,
        task_id: String,
        error: String,
    },

    /// A task was skipped by its condition or a failed dependency.
    TaskSkipped {
        execution_id: String,
        task_id: String,
        reason: String,
    },

    /// The execution reached a terminal status.
    ExecutionFinished {
        execution_id: String,
        status: ExecutionStatus,
        duration_ms: u64,
    },
}

impl EngineEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> &str {
        match self {
            EngineEvent::ExecutionStarted { execution_id, .. }
            | EngineEvent::TaskStarted { execution_id, .. }
            | EngineEvent::TaskRetrying { execution_id, .. }
            | EngineEvent::TaskSucceeded { execution_id, .. }
            | EngineEvent::TaskFailed { execution_id, .. }
            | EngineEvent::TaskSkipped { execution_id, .. }
            | EngineEvent::ExecutionFinished { execution_id, .. } => execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_tagged() {
        let event = EngineEvent::TaskSkipped {
            execution_id: "run-1".into(),
            task_id: "b".into(),
            reason: "condition evaluated to false".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_skipped");
        assert_eq!(json["task_id"], "b");

        let parsed: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_execution_id_accessor() {
        let event = EngineEvent::ExecutionFinished {
            execution_id: "run-9".into(),
            status: ExecutionStatus::Success,
            duration_ms: 12,
        };
        assert_eq!(event.execution_id(), "run-9");
    }
}

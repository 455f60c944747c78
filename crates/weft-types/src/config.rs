//! Engine configuration types for weft.
//!
//! `EngineConfig` controls the execution monitor, the event bus, and default
//! task limits. Loaded from an optional `weft.toml`; every field has a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for a `WorkflowEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between monitor sweeps.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// How long a terminal execution stays queryable after it ends.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Capacity of the engine event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Per-attempt timeout applied to tasks that declare none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_task_timeout_secs: Option<u64>,
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_retention_secs() -> u64 {
    86_400
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: default_monitor_interval_secs(),
            retention_secs: default_retention_secs(),
            event_capacity: default_event_capacity(),
            default_task_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Monitor tick interval. Never zero.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.monitor_interval_secs, 60);
        assert_eq!(config.retention_secs, 86_400);
        assert_eq!(config.event_capacity, 1024);
        assert!(config.default_task_timeout_secs.is_none());
    }

    #[test]
    fn test_engine_config_partial_toml() {
        let config: EngineConfig = toml::from_str("retention_secs = 120\n").unwrap();
        assert_eq!(config.retention_secs, 120);
        assert_eq!(config.monitor_interval_secs, 60);
        assert_eq!(config.retention(), Duration::from_secs(120));
    }

    #[test]
    fn test_monitor_interval_never_zero() {
        let config = EngineConfig {
            monitor_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.monitor_interval(), Duration::from_secs(1));
    }
}

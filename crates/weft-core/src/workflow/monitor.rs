//! Background sweep that evicts finished executions after a retention window.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::manager::ExecutionManager;

/// Periodically removes terminal executions older than `retention`.
pub struct ExecutionMonitor {
    manager: Arc<ExecutionManager>,
    interval: Duration,
    retention: Duration,
}

impl ExecutionMonitor {
    pub fn new(manager: Arc<ExecutionManager>, interval: Duration, retention: Duration) -> Self {
        Self {
            manager,
            interval,
            retention,
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        tracing::debug!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            "execution monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.manager.evict_terminal(self.retention).await;
                    if evicted > 0 {
                        tracing::info!(evicted, remaining = self.manager.len(), "evicted finished executions");
                    }
                }
            }
        }

        tracing::debug!("execution monitor stopped");
    }
}

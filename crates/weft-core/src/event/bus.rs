//! Fan-out of `EngineEvent`s over a `tokio::sync::broadcast` channel.

use tokio::sync::broadcast;
use weft_types::event::EngineEvent;

/// Cloneable handle to the engine's event channel.
///
/// Every clone publishes into the same channel. Receivers only see events
/// published after they subscribed; slow receivers observe `Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Send `event` to current subscribers and return how many there were.
    pub fn publish(&self, event: EngineEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(
                    execution_id = event.execution_id(),
                    "event dropped, no subscribers"
                );
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::execution::ExecutionStatus;

    fn skipped(task_id: &str) -> EngineEvent {
        EngineEvent::TaskSkipped {
            execution_id: "run-1".to_string(),
            task_id: task_id.to_string(),
            reason: "condition evaluated to false".to_string(),
        }
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(skipped("a"));
        bus.publish(EngineEvent::ExecutionFinished {
            execution_id: "run-1".into(),
            status: ExecutionStatus::Success,
            duration_ms: 5,
        });

        assert_eq!(rx.recv().await.unwrap(), skipped("a"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::ExecutionFinished { duration_ms: 5, .. }
        ));
    }

    #[test]
    fn publish_reports_receiver_count() {
        let bus = EventBus::new(8);
        assert_eq!(bus.publish(skipped("a")), 0);

        let _rx1 = bus.subscribe();
        let _rx2 = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(bus.publish(skipped("b")), 2);
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(8);
        let _early = bus.subscribe();
        bus.publish(skipped("before"));

        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
        bus.publish(skipped("after"));
        assert_eq!(late.try_recv().unwrap(), skipped("after"));
    }

    #[test]
    fn zero_capacity_is_usable_and_lags() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(skipped("a"));
        bus.publish(skipped("b"));

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(1))
        ));
        assert_eq!(rx.try_recv().unwrap(), skipped("b"));
    }
}

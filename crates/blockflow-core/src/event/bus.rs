//! Broadcast bus for distributing `TraceEvent` to live subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op; the execution context keeps the authoritative log, so a
//! lagging subscriber can always catch up from it.

use blockflow_types::event::TraceEvent;
use tokio::sync::broadcast;

/// Multi-consumer trace bus owned by one execution context.
pub struct TraceBus {
    sender: broadcast::Sender<TraceEvent>,
}

impl TraceBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: TraceEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for TraceBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for TraceBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_types::event::TraceEventKind;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event(seq: u64) -> TraceEvent {
        TraceEvent {
            execution_id: Uuid::now_v7(),
            seq,
            timestamp: Utc::now(),
            kind: TraceEventKind::RunStarted {
                workflow_name: "test".to_string(),
                block_count: 1,
            },
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = TraceBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(sample_event(0));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.seq, 0);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = TraceBus::new(16);
        bus.publish(sample_event(0));
        bus.publish(sample_event(1));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn lagged_receiver_reports_lag() {
        let bus = TraceBus::new(4);
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.publish(sample_event(i));
        }
        match rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[test]
    fn clone_shares_channel() {
        let bus = TraceBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(sample_event(0));

        assert!(rx.try_recv().is_ok());
    }
}

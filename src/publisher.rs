// =============================================================================
// Change publisher — best-effort fan-out of value-history inserts
// =============================================================================
//
// One event type. Delivery is best-effort: subscribers that disconnect are
// skipped, late subscribers see nothing before their subscribe call, and a
// slow subscriber that overruns the channel buffer loses the oldest events.
// =============================================================================

use tokio::sync::broadcast;

use crate::types::ChangeEvent;

const CHANNEL_CAPACITY: usize = 64;

/// Fan-out hub for [`ChangeEvent`]s. Clone-able; all clones share the same
/// underlying channel.
#[derive(Clone)]
pub struct ChangePublisher {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangePublisher {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future change events. Nothing published before this call
    /// is replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers and return the receiver
    /// count. Returns 0 when nobody is subscribed.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for ChangePublisher {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(symbol: &str, value: f64) -> ChangeEvent {
        ChangeEvent {
            symbol: symbol.to_string(),
            value,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn publish_without_subscribers_returns_zero() {
        let publisher = ChangePublisher::new();
        assert_eq!(publisher.publish(event("ivoire", 1.0)), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let publisher = ChangePublisher::new();
        let mut rx = publisher.subscribe();

        assert_eq!(publisher.publish(event("ivoire", 42.0)), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.symbol, "ivoire");
        assert!((received.value - 42.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn late_subscriber_sees_nothing_published_earlier() {
        let publisher = ChangePublisher::new();
        publisher.publish(event("ivoire", 1.0));

        let mut rx = publisher.subscribe();
        publisher.publish(event("ivoire", 2.0));

        let received = rx.recv().await.unwrap();
        assert!((received.value - 2.0).abs() < f64::EPSILON);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}

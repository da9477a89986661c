use std::sync::Arc;

use harbor_bus::Publisher;
use harbor_events::{Event, RawEvent, Topic};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::metrics::GatewayStats;
use crate::wait_for_shutdown;

/// What happened to one raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Published,
    /// No id and no type; nothing was published.
    Discarded,
    /// Encoding or publishing failed; the event is dropped.
    Failed,
}

/// Turns raw runtime events into bus messages, one publish per event.
///
/// Best effort: failures are logged and counted, never retried.
pub struct Normalizer {
    publisher: Arc<dyn Publisher>,
    stats: Arc<GatewayStats>,
}

impl Normalizer {
    pub fn new(publisher: Arc<dyn Publisher>, stats: Arc<GatewayStats>) -> Self {
        Self { publisher, stats }
    }

    pub async fn handle(&self, raw: RawEvent) -> Outcome {
        debug!(
            id = %raw.id,
            kind = %raw.kind,
            status = %raw.status,
            action = %raw.action,
            "Event received"
        );

        if raw.is_empty() {
            GatewayStats::incr(&self.stats.events_discarded);
            return Outcome::Discarded;
        }

        let event = Event::normalize(raw);
        let topic = Topic::for_event(&event);

        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, id = %event.id, "Failed to encode event");
                GatewayStats::incr(&self.stats.publish_failures);
                return Outcome::Failed;
            }
        };

        match self.publisher.publish(topic.as_str(), payload).await {
            Ok(()) => {
                GatewayStats::incr(&self.stats.events_processed);
                Outcome::Published
            }
            Err(e) => {
                warn!(error = %e, topic = %topic, id = %event.id, "Publish failed; event dropped");
                GatewayStats::incr(&self.stats.publish_failures);
                Outcome::Failed
            }
        }
    }

    /// Drain `events` until the channel closes or shutdown is requested.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<RawEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Normalizer started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle(event).await;
                    }
                    None => break,
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Normalizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use bytes::Bytes;
    use harbor_bus::{LocalBus, PublishError};

    struct Refusing;

    #[async_trait]
    impl Publisher for Refusing {
        async fn publish(&self, _topic: &str, _payload: Bytes) -> Result<(), PublishError> {
            Err(PublishError::Transport("connection refused".to_string()))
        }
    }

    fn raw(id: &str, kind: &str, action: &str, status: &str) -> RawEvent {
        RawEvent {
            id: id.to_string(),
            kind: kind.to_string(),
            action: action.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publishes_on_type_topic() {
        let bus = LocalBus::new();
        let stats = GatewayStats::new();
        let normalizer = Normalizer::new(Arc::new(bus.clone()), Arc::clone(&stats));

        let outcome = normalizer
            .handle(raw("abc123", "container", "start", "start"))
            .await;
        assert_eq!(outcome, Outcome::Published);
        assert_eq!(stats.events_processed(), 1);

        let message = bus.last("container").unwrap();
        let event = Event::from_payload(&message.payload).unwrap();
        assert_eq!(event.id, "abc123");
        assert_eq!(event.kind, "container");
    }

    #[tokio::test]
    async fn test_empty_event_is_discarded() {
        let bus = LocalBus::new();
        let stats = GatewayStats::new();
        let normalizer = Normalizer::new(Arc::new(bus.clone()), Arc::clone(&stats));

        let outcome = normalizer.handle(raw("", "", "", "exec_start")).await;
        assert_eq!(outcome, Outcome::Discarded);
        assert_eq!(stats.events_discarded(), 1);
        assert_eq!(stats.events_processed(), 0);
        assert!(bus.topics().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_counted_not_processed() {
        let stats = GatewayStats::new();
        let normalizer = Normalizer::new(Arc::new(Refusing), Arc::clone(&stats));

        let outcome = normalizer
            .handle(raw("abc123", "container", "die", "die"))
            .await;
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(stats.publish_failures(), 1);
        assert_eq!(stats.events_processed(), 0);
    }
}

//! Relay behavior end to end: scripted runtime in, recorded bus out.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use harbor_bus::LocalBus;
use harbor_events::{Event, RawEvent, Topic, BOOTSTRAP_ID, BOOTSTRAP_STATUS};
use harbor_gateway::{GatewayStats, Relay};
use harbor_runtime::SourceError;
use harbor_testing::{eventually, RecordingPublisher, ScriptedEventSource, SourceCall};
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);
const HEALTH_INTERVAL: Duration = Duration::from_millis(10);

struct Running {
    source: ScriptedEventSource,
    publisher: RecordingPublisher,
    stats: Arc<GatewayStats>,
    shutdown: watch::Sender<bool>,
    relay: Relay,
}

impl Running {
    fn start(source: ScriptedEventSource, publisher: RecordingPublisher) -> Self {
        let stats = GatewayStats::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let relay = Relay::spawn_with_health_interval(
            Arc::new(source.clone()),
            Arc::new(publisher.clone()),
            Arc::clone(&stats),
            shutdown_rx,
            HEALTH_INTERVAL,
        );

        Self {
            source,
            publisher,
            stats,
            shutdown,
            relay,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        tokio::time::timeout(WAIT, self.relay.join()).await.unwrap();
    }
}

fn container_start() -> RawEvent {
    RawEvent {
        id: "abc123".to_string(),
        kind: "container".to_string(),
        action: "start".to_string(),
        status: "start".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_event_is_published_on_its_type() {
    let relay = Running::start(ScriptedEventSource::new(), RecordingPublisher::new());
    assert!(eventually(WAIT, || relay.stats.events_processed() == 1).await);
    let before = relay.stats.events_processed();

    let session = relay.source.session(0).unwrap();
    assert!(session.emit(container_start()).await);

    assert!(eventually(WAIT, || relay.publisher.published().len() == 2).await);
    assert_eq!(relay.stats.events_processed(), before + 1);

    let published = relay.publisher.published();
    assert_eq!(published[1].topic, "container");
    let event = Event::from_payload(&published[1].payload).unwrap();
    assert_eq!(event.id, "abc123");
    assert_eq!(event.kind, "container");
    assert_eq!(event.action, "start");
    assert_eq!(event.status, "start");

    relay.stop().await;
}

#[tokio::test]
async fn test_empty_events_are_never_published() {
    let relay = Running::start(ScriptedEventSource::new(), RecordingPublisher::new());
    assert!(eventually(WAIT, || relay.publisher.attempts() == 1).await);

    let session = relay.source.session(0).unwrap();
    session.emit(RawEvent::default()).await;
    session.emit(container_start()).await;

    assert!(eventually(WAIT, || relay.publisher.attempts() == 2).await);
    assert_eq!(relay.stats.events_discarded(), 1);
    assert!(relay
        .publisher
        .published()
        .iter()
        .all(|p| !Event::from_payload(&p.payload).unwrap().id.is_empty()));

    relay.stop().await;
}

#[tokio::test]
async fn test_recovery_after_unavailable_runtime() {
    let source = ScriptedEventSource::new();
    source.script_health([
        Err(SourceError::Unavailable("No primary manager elected".to_string())),
        Err(SourceError::Unavailable("No primary manager elected".to_string())),
    ]);
    let relay = Running::start(source, RecordingPublisher::new());
    assert!(eventually(WAIT, || relay.publisher.published().len() == 1).await);

    let first = relay.source.session(0).unwrap();
    first.emit(container_start()).await;
    assert!(eventually(WAIT, || relay.publisher.published().len() == 2).await);

    first
        .fail(SourceError::Unavailable(
            "500 Internal Server Error: No primary manager elected".to_string(),
        ))
        .await;

    assert!(eventually(WAIT, || relay.publisher.published().len() == 3).await);
    assert!(first.is_cancelled());
    assert_eq!(relay.source.session_count(), 2);
    assert!(!relay.source.saw_overlapping_sessions());
    assert_eq!(relay.stats.session_restarts(), 1);

    assert_eq!(
        relay.source.calls(),
        vec![
            SourceCall::Subscribe,
            SourceCall::HealthCheck,
            SourceCall::HealthCheck,
            SourceCall::HealthCheck,
            SourceCall::Subscribe,
        ]
    );

    let bootstrap = &relay.publisher.published()[2];
    assert_eq!(bootstrap.topic, Topic::BROADCAST);
    let event = Event::from_payload(&bootstrap.payload).unwrap();
    assert_eq!(event.id, BOOTSTRAP_ID);
    assert_eq!(event.status, BOOTSTRAP_STATUS);

    // Events still trickling out of the replaced session are not forwarded.
    first.emit(container_start()).await;
    let second = relay.source.session(1).unwrap();
    second.emit(container_start()).await;
    assert!(eventually(WAIT, || relay.publisher.published().len() == 4).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relay.publisher.published().len(), 4);

    relay.stop().await;
}

#[tokio::test]
async fn test_reported_errors_follow_classification() {
    let relay = Running::start(ScriptedEventSource::new(), RecordingPublisher::new());
    assert!(eventually(WAIT, || relay.publisher.published().len() == 1).await);

    relay
        .relay
        .handle()
        .report(SourceError::Fatal("no such image".to_string()))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.source.session_count(), 1);
    assert_eq!(relay.source.health_checks(), 0);

    relay
        .relay
        .handle()
        .report(SourceError::Unavailable(
            "500 Internal Server Error".to_string(),
        ))
        .await;
    assert!(eventually(WAIT, || relay.source.session_count() == 2).await);
    assert_eq!(relay.source.health_checks(), 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_publish_failures_are_dropped() {
    let relay = Running::start(ScriptedEventSource::new(), RecordingPublisher::failing());
    assert!(eventually(WAIT, || relay.publisher.attempts() == 1).await);

    relay
        .source
        .session(0)
        .unwrap()
        .emit(container_start())
        .await;

    assert!(eventually(WAIT, || relay.stats.publish_failures() == 2).await);
    assert_eq!(relay.stats.events_processed(), 0);
    assert!(relay.publisher.published().is_empty());
    assert_eq!(relay.source.session_count(), 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_bootstrap_reaches_every_topic_on_local_bus() {
    let bus = LocalBus::new();
    let mut containers = bus.stream("container");
    let mut services = bus.stream("service");

    let source = ScriptedEventSource::new();
    let stats = GatewayStats::new();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let relay = Relay::spawn(
        Arc::new(source.clone()),
        Arc::new(bus.clone()),
        Arc::clone(&stats),
        shutdown_rx,
    );

    let first = tokio::time::timeout(WAIT, containers.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(Event::from_payload(&first.payload).unwrap().id == BOOTSTRAP_ID);
    let first = tokio::time::timeout(WAIT, services.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.topic, Topic::BROADCAST);

    source.session(0).unwrap().emit(container_start()).await;
    let next = tokio::time::timeout(WAIT, containers.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(next.topic, "container");
    assert_eq!(Event::from_payload(&next.payload).unwrap().id, "abc123");

    shutdown.send(true).unwrap();
    tokio::time::timeout(WAIT, relay.join()).await.unwrap();
}

//! Event source capability.
//!
//! An [`EventSource`] opens subscriptions to the runtime's event stream and
//! probes runtime liveness. It never retries on its own: every failure is
//! reported once on the subscription's error channel and the caller decides
//! what happens next.

use async_trait::async_trait;
use futures_util::StreamExt;
use harbor_events::RawEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::RuntimeClient;
use crate::error::SourceError;

/// Capacity of a subscription's event channel.
pub const EVENT_BUFFER: usize = 256;

/// One open event stream.
///
/// Both channels close once the subscription's task ends, either because
/// its cancellation token fired or because it reported an error.
#[derive(Debug)]
pub struct Subscription {
    pub events: mpsc::Receiver<RawEvent>,
    pub errors: mpsc::Receiver<SourceError>,
}

#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    /// Open a subscription that lives until `cancel` fires or the stream fails.
    async fn subscribe(&self, cancel: CancellationToken) -> Subscription;

    /// Cheap round trip proving the runtime is reachable and serving.
    async fn health_check(&self) -> Result<(), SourceError>;
}

/// [`EventSource`] backed by the runtime's engine API.
#[derive(Debug, Clone)]
pub struct RuntimeEventSource {
    client: RuntimeClient,
}

impl RuntimeEventSource {
    pub fn new(client: RuntimeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSource for RuntimeEventSource {
    async fn subscribe(&self, cancel: CancellationToken) -> Subscription {
        let (event_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (error_tx, errors) = mpsc::channel(1);
        let client = self.client.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Event subscription cancelled");
                }
                result = forward(client, event_tx) => {
                    if let Err(e) = result {
                        warn!(error = %e, "Event subscription failed");
                        let _ = error_tx.send(e).await;
                    }
                }
            }
        });

        Subscription { events, errors }
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        self.client.info().await.map(|_| ()).map_err(SourceError::from)
    }
}

async fn forward(client: RuntimeClient, tx: mpsc::Sender<RawEvent>) -> Result<(), SourceError> {
    let mut stream = client.events().await?;

    while let Some(item) = stream.next().await {
        if tx.send(item?).await.is_err() {
            // Nobody is reading anymore.
            return Ok(());
        }
    }

    Err(SourceError::StreamClosed)
}

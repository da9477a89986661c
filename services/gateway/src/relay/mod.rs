//! Event relay: runtime events in, bus messages out.
//!
//! Two tasks joined by a channel. The [`RecoveryCoordinator`] owns the event
//! stream session and the [`Normalizer`] publishes what it forwards.

mod coordinator;
mod normalizer;

use std::sync::Arc;
use std::time::Duration;

use harbor_bus::Publisher;
use harbor_runtime::EventSource;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::metrics::GatewayStats;

pub use coordinator::{
    CoordinatorHandle, RecoveryCoordinator, RecoveryState, DEFAULT_HEALTH_INTERVAL,
};
pub use normalizer::{Normalizer, Outcome};

/// Capacity of the channel between the coordinator and the normalizer.
pub const RELAY_BUFFER: usize = 1024;

/// A running relay.
pub struct Relay {
    handle: CoordinatorHandle,
    coordinator: JoinHandle<()>,
    normalizer: JoinHandle<()>,
}

impl Relay {
    /// Start relaying events from `source` to `publisher`.
    pub fn spawn(
        source: Arc<dyn EventSource>,
        publisher: Arc<dyn Publisher>,
        stats: Arc<GatewayStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self::spawn_with_health_interval(
            source,
            publisher,
            stats,
            shutdown,
            DEFAULT_HEALTH_INTERVAL,
        )
    }

    pub fn spawn_with_health_interval(
        source: Arc<dyn EventSource>,
        publisher: Arc<dyn Publisher>,
        stats: Arc<GatewayStats>,
        shutdown: watch::Receiver<bool>,
        health_interval: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(RELAY_BUFFER);

        let (coordinator, handle) =
            RecoveryCoordinator::new(source, events_tx, Arc::clone(&stats));
        let coordinator = coordinator.with_health_interval(health_interval);
        let normalizer = Normalizer::new(publisher, stats);

        Self {
            handle,
            coordinator: tokio::spawn(coordinator.run(shutdown.clone())),
            normalizer: tokio::spawn(normalizer.run(events_rx, shutdown)),
        }
    }

    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    /// Wait for both tasks to finish after shutdown was requested.
    pub async fn join(self) {
        if let Err(e) = self.coordinator.await {
            warn!(error = %e, "Coordinator task failed");
        }
        if let Err(e) = self.normalizer.await {
            warn!(error = %e, "Normalizer task failed");
        }
    }
}

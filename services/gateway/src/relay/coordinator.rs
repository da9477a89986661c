//! Session lifecycle and recovery.
//!
//! The coordinator keeps exactly one event stream session open. When the
//! session's error channel yields, or a transient error is reported from
//! elsewhere, it waits for the runtime to pass a health check and then
//! replaces the session:
//!
//! ```text
//! Streaming ──error──► ErrorObserved ──► WaitingForHealthy ──healthy──► Streaming
//!     ▲                                        │    ▲
//!     │                                        └────┘ retry every interval
//!     └── restart: cancel + await old session, subscribe, inject bootstrap
//! ```
//!
//! There is no backoff and no retry ceiling; the loop ends only on shutdown.

use std::sync::Arc;
use std::time::Duration;

use harbor_events::RawEvent;
use harbor_runtime::{EventSource, SourceError, Subscription};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::GatewayStats;
use crate::wait_for_shutdown;

/// Delay between health checks while waiting for the runtime.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(1);

const SIGNAL_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Streaming,
    ErrorObserved,
    WaitingForHealthy,
}

/// A stream error tagged with the session that produced it.
#[derive(Debug)]
struct SessionSignal {
    session: u64,
    error: SourceError,
}

struct Session {
    id: u64,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

/// Cloneable handle for observing the coordinator and reporting errors to it.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    general: mpsc::Sender<SourceError>,
    state: watch::Receiver<RecoveryState>,
}

impl CoordinatorHandle {
    /// Report an error observed outside the event stream.
    ///
    /// Transient errors drive recovery; anything else is logged and dropped.
    pub async fn report(&self, error: SourceError) {
        if self.general.send(error).await.is_err() {
            debug!("Coordinator stopped; dropping reported error");
        }
    }

    pub fn state(&self) -> RecoveryState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<RecoveryState> {
        self.state.clone()
    }
}

/// Keeps one event stream session alive and feeds its events downstream.
pub struct RecoveryCoordinator {
    source: Arc<dyn EventSource>,
    events: mpsc::Sender<RawEvent>,
    stats: Arc<GatewayStats>,
    health_interval: Duration,

    signals_tx: mpsc::Sender<SessionSignal>,
    signals_rx: mpsc::Receiver<SessionSignal>,
    general_rx: mpsc::Receiver<SourceError>,
    state: watch::Sender<RecoveryState>,

    session: Option<Session>,
    sessions_opened: u64,
}

impl RecoveryCoordinator {
    /// Build a coordinator forwarding events from `source` into `events`.
    pub fn new(
        source: Arc<dyn EventSource>,
        events: mpsc::Sender<RawEvent>,
        stats: Arc<GatewayStats>,
    ) -> (Self, CoordinatorHandle) {
        let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (general_tx, general_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (state, state_rx) = watch::channel(RecoveryState::Streaming);

        let coordinator = Self {
            source,
            events,
            stats,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            signals_tx,
            signals_rx,
            general_rx,
            state,
            session: None,
            sessions_opened: 0,
        };
        let handle = CoordinatorHandle {
            general: general_tx,
            state: state_rx,
        };

        (coordinator, handle)
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Stream, recover, repeat. Returns once shutdown is requested.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Recovery coordinator started");
        self.restart().await;

        loop {
            let error = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                Some(signal) = self.signals_rx.recv() => {
                    if Some(signal.session) != self.session.as_ref().map(|s| s.id) {
                        debug!(
                            session = signal.session,
                            error = %signal.error,
                            "Ignoring error from a replaced session"
                        );
                        continue;
                    }
                    warn!(session = signal.session, error = %signal.error, "Event stream failed");
                    signal.error
                }
                Some(error) = self.general_rx.recv() => {
                    if !error.is_transient() {
                        error!(error = %error, "Unclassified runtime error; not recovering");
                        continue;
                    }
                    warn!(error = %error, "Runtime reported unavailable");
                    error
                }
            };

            self.transition(RecoveryState::ErrorObserved);
            debug!(error = %error, "Starting recovery");

            self.transition(RecoveryState::WaitingForHealthy);
            if !self.wait_for_healthy(&mut shutdown).await {
                break;
            }

            self.restart().await;
        }

        self.stop_session().await;
        info!("Recovery coordinator stopped");
    }

    /// Probe the runtime until it answers. `false` if shutdown came first.
    async fn wait_for_healthy(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = wait_for_shutdown(shutdown) => return false,
                result = self.source.health_check() => result,
            };

            match result {
                Ok(()) => {
                    info!(attempt, "Runtime healthy; restarting event stream");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Runtime not ready; retrying");
                }
            }

            tokio::select! {
                _ = wait_for_shutdown(shutdown) => return false,
                _ = tokio::time::sleep(self.health_interval) => {}
            }
        }
    }

    /// Replace the current session with a fresh one.
    ///
    /// The previous session is cancelled and its supervisor awaited before
    /// the source is subscribed again, so two sessions never overlap.
    async fn restart(&mut self) {
        self.stop_session().await;

        // Errors reported before this point describe the old session.
        while let Ok(error) = self.general_rx.try_recv() {
            debug!(error = %error, "Discarding error reported before restart");
        }

        self.sessions_opened += 1;
        let id = self.sessions_opened;
        if id > 1 {
            GatewayStats::incr(&self.stats.session_restarts);
        }

        let cancel = CancellationToken::new();
        let subscription = self.source.subscribe(cancel.clone()).await;
        let supervisor = tokio::spawn(supervise(
            id,
            subscription,
            cancel.clone(),
            self.events.clone(),
            self.signals_tx.clone(),
        ));

        self.session = Some(Session {
            id,
            cancel,
            supervisor,
        });
        self.transition(RecoveryState::Streaming);
        info!(session = id, "Event stream session opened");
    }

    async fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            if let Err(e) = session.supervisor.await {
                error!(session = session.id, error = %e, "Session supervisor panicked");
            }
            debug!(session = session.id, "Event stream session closed");
        }
    }

    fn transition(&self, next: RecoveryState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Recovery state changed");
        }
    }
}

/// Forward one session's events, then its first error, until cancelled.
///
/// The bootstrap event goes out before anything the source emits.
async fn supervise(
    session: u64,
    mut subscription: Subscription,
    cancel: CancellationToken,
    events: mpsc::Sender<RawEvent>,
    signals: mpsc::Sender<SessionSignal>,
) {
    if events.send(RawEvent::bootstrap()).await.is_err() {
        return;
    }

    let mut events_open = true;
    let mut errors_open = true;

    let error = loop {
        if !events_open && !errors_open {
            // Both channels closed without a word from the source.
            break SourceError::StreamClosed;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return,

            event = subscription.events.recv(), if events_open => match event {
                Some(event) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = events.send(event) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                None => events_open = false,
            },

            error = subscription.errors.recv(), if errors_open => match error {
                Some(error) => break error,
                None => errors_open = false,
            },
        }
    };

    let _ = signals.send(SessionSignal { session, error }).await;
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use harbor_events::RawEvent;
use harbor_runtime::{EventSource, SourceError, Subscription};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A call made on a [`ScriptedEventSource`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCall {
    Subscribe,
    HealthCheck,
}

/// The test's end of one subscription.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<RawEvent>,
    errors: mpsc::Sender<SourceError>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Deliver a raw event. `false` once the subscriber dropped its receiver.
    pub async fn emit(&self, event: RawEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Report a stream error.
    pub async fn fail(&self, error: SourceError) -> bool {
        self.errors.send(error).await.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Default)]
struct State {
    health: VecDeque<Result<(), SourceError>>,
    calls: Vec<SourceCall>,
    sessions: Vec<SessionHandle>,
    overlapping: bool,
}

/// Event source driven by the test.
///
/// Health checks consume scripted results in order and succeed once the
/// script is exhausted.
#[derive(Clone, Default)]
pub struct ScriptedEventSource {
    state: Arc<Mutex<State>>,
}

impl ScriptedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_health<I>(&self, results: I)
    where
        I: IntoIterator<Item = Result<(), SourceError>>,
    {
        self.lock().health.extend(results);
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.lock().calls.clone()
    }

    pub fn health_checks(&self) -> usize {
        self.count(SourceCall::HealthCheck)
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn session(&self, index: usize) -> Option<SessionHandle> {
        self.lock().sessions.get(index).cloned()
    }

    pub fn latest_session(&self) -> Option<SessionHandle> {
        self.lock().sessions.last().cloned()
    }

    /// Whether a subscription was opened while an earlier one was still live.
    pub fn saw_overlapping_sessions(&self) -> bool {
        self.lock().overlapping
    }

    fn count(&self, call: SourceCall) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn subscribe(&self, cancel: CancellationToken) -> Subscription {
        let (event_tx, events) = mpsc::channel(64);
        let (error_tx, errors) = mpsc::channel(4);

        let mut state = self.lock();
        state.calls.push(SourceCall::Subscribe);
        if state.sessions.iter().any(|session| !session.is_cancelled()) {
            state.overlapping = true;
        }
        state.sessions.push(SessionHandle {
            events: event_tx,
            errors: error_tx,
            cancel,
        });

        Subscription { events, errors }
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        let mut state = self.lock();
        state.calls.push(SourceCall::HealthCheck);
        state.health.pop_front().unwrap_or(Ok(()))
    }
}

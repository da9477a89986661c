use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use harbor_bus::{PublishError, Publisher};

/// One recorded publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Default)]
struct State {
    published: Vec<Published>,
    attempts: usize,
    fail_next: usize,
    fail_all: bool,
}

/// Publisher that records successful calls and fails on demand.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    state: Arc<Mutex<State>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every call fails.
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.lock().fail_all = true;
        publisher
    }

    /// Fail the next `n` calls.
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// Successful calls, in order.
    pub fn published(&self) -> Vec<Published> {
        self.lock().published.clone()
    }

    /// Every call, successful or not.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        let mut state = self.lock();
        state.attempts += 1;

        if state.fail_all || state.fail_next > 0 {
            state.fail_next = state.fail_next.saturating_sub(1);
            return Err(PublishError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        state.published.push(Published {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

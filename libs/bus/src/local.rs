//! In-process topic bus.
//!
//! [`LocalBus`] keeps one [`tokio::sync::broadcast`] channel per topic.
//!
//! ## Rules
//! - **Synchronous fan-out**: `put()` hands the message to every receiver of
//!   the topic before returning; it never blocks.
//! - **Ordered per topic**: receivers observe a topic's messages in publish order.
//! - **No replay**: a receiver only sees messages published after it subscribed.
//!   The last message of each topic is retained for polling (`last()`), nothing more.
//! - **Lag handling**: a receiver more than `capacity` messages behind skips the
//!   oldest ones.
//! - **Broadcast topic**: a message published on [`Topic::BROADCAST`] is delivered
//!   to the receivers of every topic as well as to broadcast receivers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use harbor_events::Topic;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::error::{BusError, PublishError};
use crate::message::Message;
use crate::{MessageStream, Publisher, Subscribe};

/// Default per-topic channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

struct TopicState {
    tx: broadcast::Sender<Message>,
    last: Option<Message>,
    published: u64,
}

impl TopicState {
    fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            last: None,
            published: 0,
        }
    }

    fn deliver(&mut self, message: &Message) {
        // No receivers is fine: streaming subscribers only get what they were
        // attached for.
        let _ = self.tx.send(message.clone());
        self.published += 1;
    }
}

struct Inner {
    topics: RwLock<HashMap<String, TopicState>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// Snapshot of one topic, as reported by `GET /events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub published: u64,
    pub subscribers: usize,
}

/// Embedded publish/subscribe bus. Cheap to clone.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// The minimum capacity is 1 (clamped).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Publish `payload` on `topic` and return the message as delivered.
    pub fn put(&self, topic: &str, payload: Bytes) -> Message {
        let message = Message {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            topic: topic.to_string(),
            payload,
            created: Utc::now(),
        };

        let mut topics = self
            .inner
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if topic == Topic::BROADCAST {
            for (name, state) in topics.iter_mut() {
                if name.as_str() != Topic::BROADCAST {
                    state.deliver(&message);
                }
            }
        }

        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.inner.capacity));
        state.deliver(&message);
        state.last = Some(message.clone());

        debug!(topic = %topic, id = message.id, "Message published");
        message
    }

    /// Attach a receiver to `topic`, creating the topic if needed.
    pub fn subscribe_raw(&self, topic: &str) -> broadcast::Receiver<Message> {
        let mut topics = self
            .inner
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.inner.capacity))
            .tx
            .subscribe()
    }

    /// Attach to `topic` as a stream; lagged receivers skip ahead.
    pub fn stream(&self, topic: &str) -> MessageStream {
        let name = topic.to_string();
        let stream = BroadcastStream::new(self.subscribe_raw(topic)).filter_map(move |item| {
            match item {
                Ok(message) => Some(Ok(message)),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(topic = %name, skipped, "Subscriber lagged, messages dropped");
                    None
                }
            }
        });
        Box::pin(stream)
    }

    /// The most recent message of `topic`.
    pub fn last(&self, topic: &str) -> Option<Message> {
        let topics = self
            .inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).and_then(|state| state.last.clone())
    }

    pub fn topics(&self) -> Vec<TopicInfo> {
        let topics = self
            .inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<TopicInfo> = topics
            .iter()
            .map(|(name, state)| TopicInfo {
                name: Topic::new(name.clone()).to_path().to_string(),
                published: state.published,
                subscribers: state.tx.receiver_count(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Remove a topic. Its streaming subscribers observe end-of-stream.
    pub fn remove(&self, topic: &str) -> bool {
        let mut topics = self
            .inner
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        topics.remove(topic).is_some()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for LocalBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        self.put(topic, payload);
        Ok(())
    }
}

#[async_trait]
impl Subscribe for LocalBus {
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BusError> {
        Ok(self.stream(topic))
    }
}

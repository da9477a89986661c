//! # harbor-bus
//!
//! Topic-addressed publish/subscribe bus.
//!
//! ## Capabilities
//!
//! - [`Publisher`]: `publish(topic, payload)`. Implemented by [`LocalBus`]
//!   (in-process fan-out) and [`RemotePublisher`] (HTTP client for a bus
//!   running in another process).
//! - [`Subscribe`]: a stream of [`Message`]s delivered on a topic after the
//!   subscription attached. Implemented by [`LocalBus`] and [`RemoteSubscriber`].
//!
//! The HTTP surface that fronts a [`LocalBus`] lives in [`http`]; the remote
//! implementations speak that same surface.
//!
//! ## Delivery
//!
//! Delivery is best effort: there is no persistence and no replay. The bus
//! assigns message ids; publishers never do.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

mod error;
pub mod http;
mod local;
mod message;
mod remote;

pub use error::{BusError, PublishError};
pub use local::{LocalBus, TopicInfo, DEFAULT_CAPACITY};
pub use message::{Message, Receipt};
pub use remote::{RemotePublisher, RemoteSubscriber};

/// Stream of messages delivered on one topic.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message, BusError>> + Send>>;

/// Write side of the bus.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`.
    ///
    /// Success means the bus accepted the payload, not that anyone received it.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError>;
}

/// Read side of the bus.
#[async_trait]
pub trait Subscribe: Send + Sync {
    /// Attach to `topic`. Messages published before this call are not delivered.
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BusError>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for std::sync::Arc<P> {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        (**self).publish(topic, payload).await
    }
}

//! HTTP client for a bus running in another process.
//!
//! Both types speak the surface served by [`crate::http::router`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::stream::unfold;
use futures_util::StreamExt;
use harbor_events::Topic;
use reqwest::Url;
use tracing::{debug, warn};

use crate::error::{BusError, PublishError};
use crate::message::Message;
use crate::{MessageStream, Publisher, Subscribe};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

fn topic_url(base: &Url, topic: &str) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .push(Topic::new(topic).to_path());
    Some(url)
}

fn parse_base(base_url: &str) -> Result<Url, String> {
    Url::parse(base_url)
        .map_err(|e| format!("invalid bus url {base_url:?}: {e}"))
        .and_then(|url| {
            if url.cannot_be_a_base() {
                Err(format!("invalid bus url {base_url:?}: not a base url"))
            } else {
                Ok(url)
            }
        })
}

/// Publishes by `PUT {base_url}/{topic}` with the raw payload as body.
#[derive(Clone)]
pub struct RemotePublisher {
    client: reqwest::Client,
    base_url: Url,
}

impl RemotePublisher {
    pub fn new(base_url: &str) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, PublishError> {
        let base_url = parse_base(base_url).map_err(PublishError::Transport)?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl Publisher for RemotePublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        let url = topic_url(&self.base_url, topic)
            .ok_or_else(|| PublishError::Transport("bus url cannot carry a topic".to_string()))?;

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Status { status, body });
        }

        debug!(topic = %topic, "Published to remote bus");
        Ok(())
    }
}

/// Follows a topic with `GET {base_url}/{topic}?follow=true`.
#[derive(Clone)]
pub struct RemoteSubscriber {
    client: reqwest::Client,
    base_url: Url,
}

impl RemoteSubscriber {
    pub fn new(base_url: &str) -> Result<Self, BusError> {
        // No overall timeout: the follow stream stays open indefinitely.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BusError::Transport(e.to_string()))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, BusError> {
        let base_url = parse_base(base_url).map_err(BusError::Transport)?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl Subscribe for RemoteSubscriber {
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BusError> {
        let mut url = topic_url(&self.base_url, topic)
            .ok_or_else(|| BusError::Transport("bus url cannot carry a topic".to_string()))?;
        url.query_pairs_mut().append_pair("follow", "true");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BusError::Status { status, body });
        }

        debug!(topic = %topic, "Following remote bus topic");
        Ok(ndjson_messages(response.bytes_stream()))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

struct LineState {
    body: ByteStream,
    buf: BytesMut,
    done: bool,
}

/// Split a chunked body into newline-delimited JSON messages.
///
/// Undecodable lines are skipped; only transport failures end the stream.
fn ndjson_messages<S>(body: S) -> MessageStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = LineState {
        body: Box::pin(body),
        buf: BytesMut::new(),
        done: false,
    };

    let stream = unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line = st.buf.split_to(pos + 1);
                if let Some(message) = decode_line(&line[..pos]) {
                    return Some((Ok(message), st));
                }
                continue;
            }

            if st.done {
                if st.buf.is_empty() {
                    return None;
                }
                let rest = st.buf.split();
                return decode_line(&rest).map(|message| (Ok(message), st));
            }

            match st.body.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!(error = %e, "Remote bus stream failed");
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(BusError::Transport(e.to_string())), st));
                }
                None => st.done = true,
            }
        }
    });

    Box::pin(stream)
}

fn decode_line(line: &[u8]) -> Option<Message> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice(line) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, len = line.len(), "Skipping undecodable bus message");
            None
        }
    }
}

//! HTTP surface for a [`LocalBus`].
//!
//! Mounted by the gateway under `/events`:
//!
//! | Method | Path | Behavior |
//! |---|---|---|
//! | `GET` | `/` | topics with their message counts |
//! | `PUT`, `POST` | `/{topic}` | publish the request body, `202` with a [`Receipt`] |
//! | `GET` | `/{topic}` | last retained message, or `204` |
//! | `GET` | `/{topic}?follow=true` | NDJSON stream of messages published after attaching |
//! | `DELETE` | `/{topic}` | remove the topic, `204` or `404` |
//!
//! The `*` segment addresses the broadcast topic.

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use harbor_events::Topic;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::{debug, error};

use crate::local::{LocalBus, TopicInfo};
use crate::message::Receipt;

#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub follow: bool,
}

/// Build the bus router.
pub fn router(bus: LocalBus) -> Router {
    Router::new()
        .route("/", get(list_topics))
        .route(
            "/{topic}",
            get(read_topic)
                .put(publish)
                .post(publish)
                .delete(remove_topic),
        )
        .with_state(bus)
}

async fn list_topics(State(bus): State<LocalBus>) -> Json<Vec<TopicInfo>> {
    Json(bus.topics())
}

async fn publish(
    State(bus): State<LocalBus>,
    Path(segment): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let topic = Topic::from_path(&segment);
    let message = bus.put(topic.as_str(), body);
    (StatusCode::ACCEPTED, Json(Receipt::from(&message)))
}

async fn read_topic(
    State(bus): State<LocalBus>,
    Path(segment): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let topic = Topic::from_path(&segment);

    if !query.follow {
        return match bus.last(topic.as_str()) {
            Some(message) => Json(message).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        };
    }

    debug!(topic = %topic, "Subscriber attached");

    let lines = bus.stream(topic.as_str()).filter_map(|item| {
        let message = item.ok()?;
        match serde_json::to_vec(&message) {
            Ok(mut line) => {
                line.push(b'\n');
                Some(Ok::<Bytes, Infallible>(Bytes::from(line)))
            }
            Err(e) => {
                error!(error = %e, id = message.id, "Failed to serialize message");
                None
            }
        }
    });

    let mut response = Response::new(Body::from_stream(lines));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    response
}

async fn remove_topic(State(bus): State<LocalBus>, Path(segment): Path<String>) -> StatusCode {
    let topic = Topic::from_path(&segment);
    if bus.remove(topic.as_str()) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::message::Message;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_publish_returns_receipt() {
        let bus = LocalBus::new();
        let app = router(bus.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/container")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let receipt = body_json(response).await;
        assert_eq!(receipt["topic"], "container");
        assert_eq!(&bus.last("container").unwrap().payload[..], b"payload");
    }

    #[tokio::test]
    async fn test_read_last_message() {
        let bus = LocalBus::new();
        let app = router(bus.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/service").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        bus.put("service", Bytes::from_static(b"svc"));

        let response = app
            .oneshot(Request::get("/service").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        let message: Message = serde_json::from_value(value).unwrap();
        assert_eq!(&message.payload[..], b"svc");
    }

    #[tokio::test]
    async fn test_follow_streams_new_messages() {
        let bus = LocalBus::new();
        let app = router(bus.clone());

        let response = app
            .oneshot(
                Request::get("/container?follow=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            HeaderValue::from_static("application/x-ndjson")
        );

        bus.put("container", Bytes::from_static(b"live"));

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let line = frame.into_data().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));

        let message: Message = serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(&message.payload[..], b"live");
    }

    #[tokio::test]
    async fn test_wildcard_addresses_broadcast() {
        let bus = LocalBus::new();
        let mut containers = bus.subscribe_raw("container");
        let app = router(bus.clone());

        let response = app
            .oneshot(
                Request::post("/*")
                    .body(Body::from("resync"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let message = containers.recv().await.unwrap();
        assert_eq!(message.topic, "");
        assert_eq!(&message.payload[..], b"resync");
    }

    #[tokio::test]
    async fn test_list_and_delete_topics() {
        let bus = LocalBus::new();
        bus.put("node", Bytes::from_static(b"n"));
        let app = router(bus.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let topics = body_json(response).await;
        assert_eq!(topics[0]["name"], "node");
        assert_eq!(topics[0]["published"], 1);

        let response = app
            .clone()
            .oneshot(Request::delete("/node").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::delete("/node").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

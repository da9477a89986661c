//! Canonical relay event.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::raw::{Actor, RawEvent};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A normalized runtime event, ready to be published on the bus.
///
/// The four core fields (`id`, `type`, `action`, `status`) are carried over
/// verbatim from the runtime. Serialized field names follow the runtime's own
/// event format so that existing consumers can decode payloads unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "Type", default)]
    pub kind: String,

    #[serde(rename = "Action", default)]
    pub action: String,

    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,

    #[serde(rename = "Actor", default)]
    pub actor: Actor,

    /// Unix timestamp in seconds.
    #[serde(default)]
    pub time: i64,

    /// Unix timestamp in nanoseconds.
    #[serde(rename = "timeNano", default)]
    pub time_nano: i64,
}

impl Event {
    /// Build the canonical event for a raw runtime message.
    ///
    /// Only metadata is filled in: the timestamp pair is made consistent and
    /// the actor id defaults to the event id.
    pub fn normalize(raw: RawEvent) -> Self {
        let RawEvent {
            status,
            id,
            from,
            kind,
            action,
            mut actor,
            scope,
            mut time,
            mut time_nano,
        } = raw;

        if time_nano == 0 && time != 0 {
            time_nano = time.saturating_mul(NANOS_PER_SEC);
        }
        if time == 0 && time_nano != 0 {
            time = time_nano / NANOS_PER_SEC;
        }

        if actor.id.is_empty() && !kind.is_empty() {
            actor.id = id.clone();
        }

        Self {
            id,
            kind,
            action,
            status,
            from,
            scope,
            actor,
            time,
            time_nano,
        }
    }

    /// When the runtime recorded the event, if it said so.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        if self.time_nano == 0 {
            return None;
        }
        Some(DateTime::from_timestamp_nanos(self.time_nano))
    }

    /// Encode the event as a self-describing JSON payload.
    pub fn to_payload(&self) -> Result<Bytes, EventError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode a payload produced by [`Event::to_payload`].
    pub fn from_payload(payload: &[u8]) -> Result<Self, EventError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_start() -> RawEvent {
        RawEvent {
            id: "abc123".to_string(),
            kind: "container".to_string(),
            action: "start".to_string(),
            status: "start".to_string(),
            from: "nginx:latest".to_string(),
            time: 1_700_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_keeps_core_fields() {
        let event = Event::normalize(container_start());
        assert_eq!(event.id, "abc123");
        assert_eq!(event.kind, "container");
        assert_eq!(event.action, "start");
        assert_eq!(event.status, "start");
    }

    #[test]
    fn test_normalize_fills_timestamps() {
        let event = Event::normalize(container_start());
        assert_eq!(event.time_nano, 1_700_000_000 * NANOS_PER_SEC);

        let raw = RawEvent {
            time_nano: 1_700_000_001_500_000_000,
            ..container_start()
        };
        let event = Event::normalize(raw);
        assert_eq!(event.time, 1_700_000_001);
        assert!(event.occurred_at().is_some());
    }

    #[test]
    fn test_normalize_defaults_actor_id() {
        let event = Event::normalize(container_start());
        assert_eq!(event.actor.id, "abc123");

        let event = Event::normalize(RawEvent::bootstrap());
        assert!(event.actor.id.is_empty());
        assert!(event.occurred_at().is_none());
    }

    #[test]
    fn test_payload_uses_runtime_field_names() {
        let payload = Event::normalize(container_start()).to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["id"], "abc123");
        assert_eq!(value["Type"], "container");
        assert_eq!(value["Action"], "start");
        assert_eq!(value["status"], "start");
        assert_eq!(value["Actor"]["ID"], "abc123");
    }

    #[test]
    fn test_payload_decodes_back() {
        let event = Event::normalize(container_start());
        let decoded = Event::from_payload(&event.to_payload().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_invalid_payload() {
        let err = Event::from_payload(b"not json").unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload(_)));
    }
}

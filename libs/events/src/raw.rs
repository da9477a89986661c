//! Runtime event wire format.
//!
//! This mirrors the message the runtime emits on its `/events` stream. Every
//! field is optional on the wire; older daemons only populate `status`, `id`
//! and `from`, newer ones add `Type`, `Action` and `Actor`.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Status carried by the synthetic event injected when a session (re)starts.
pub const BOOTSTRAP_STATUS: &str = "relay-start";

/// Id carried by the synthetic bootstrap event.
pub const BOOTSTRAP_ID: &str = "0";

/// The object an event is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "ID", default)]
    pub id: String,

    /// A nil map on the runtime side arrives as `null`.
    #[serde(
        rename = "Attributes",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub attributes: HashMap<String, String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single message read from the runtime's event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Legacy status field (`start`, `die`, ...).
    #[serde(default)]
    pub status: String,

    /// Legacy id field (container id for container events).
    #[serde(default)]
    pub id: String,

    /// Legacy image reference.
    #[serde(default)]
    pub from: String,

    /// Category: `container`, `service`, `node`, `network`, ...
    #[serde(rename = "Type", default)]
    pub kind: String,

    #[serde(rename = "Action", default)]
    pub action: String,

    #[serde(rename = "Actor", default)]
    pub actor: Actor,

    /// `local` or `swarm`.
    #[serde(default)]
    pub scope: String,

    /// Unix timestamp in seconds.
    #[serde(default)]
    pub time: i64,

    /// Unix timestamp in nanoseconds.
    #[serde(rename = "timeNano", default)]
    pub time_nano: i64,
}

impl RawEvent {
    /// The synthetic event injected at the start of every session so that
    /// consumers can resynchronize their view after a reconnect.
    pub fn bootstrap() -> Self {
        Self {
            id: BOOTSTRAP_ID.to_string(),
            status: BOOTSTRAP_STATUS.to_string(),
            ..Default::default()
        }
    }

    /// Events with neither an id nor a type carry nothing routable.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.kind.is_empty()
    }

    pub fn is_bootstrap(&self) -> bool {
        self.id == BOOTSTRAP_ID && self.status == BOOTSTRAP_STATUS && self.kind.is_empty()
    }
}

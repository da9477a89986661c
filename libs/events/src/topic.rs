//! Topic derivation.

use std::fmt;

use crate::event::Event;

/// Routing key on the bus.
///
/// A topic is the event's `type` verbatim. Events without a type, which in
/// practice is only the session bootstrap event, land on the broadcast topic
/// (the empty string): the bus delivers broadcast messages to the subscribers
/// of every topic so that each consumer sees the resync signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Name of the broadcast topic.
    pub const BROADCAST: &'static str = "";

    /// How the broadcast topic is spelled in URLs.
    pub const BROADCAST_PATH: &'static str = "*";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn broadcast() -> Self {
        Self(Self::BROADCAST.to_string())
    }

    /// Derive the topic an event is published on.
    pub fn for_event(event: &Event) -> Self {
        Self(event.kind.clone())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a topic from a URL path segment.
    pub fn from_path(segment: &str) -> Self {
        if segment == Self::BROADCAST_PATH {
            Self::broadcast()
        } else {
            Self(segment.to_string())
        }
    }

    /// The topic as a URL path segment.
    pub fn to_path(&self) -> &str {
        if self.is_broadcast() {
            Self::BROADCAST_PATH
        } else {
            &self.0
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            write!(f, "{}", Self::BROADCAST_PATH)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawEvent;

    #[test]
    fn test_topic_is_event_type() {
        let raw = RawEvent {
            id: "svc1".to_string(),
            kind: "service".to_string(),
            ..Default::default()
        };
        let topic = Topic::for_event(&Event::normalize(raw));
        assert_eq!(topic.as_str(), "service");
        assert!(!topic.is_broadcast());
    }

    #[test]
    fn test_bootstrap_event_is_broadcast() {
        let topic = Topic::for_event(&Event::normalize(RawEvent::bootstrap()));
        assert!(topic.is_broadcast());
        assert_eq!(topic.as_str(), "");
        assert_eq!(topic.to_path(), "*");
        assert_eq!(topic.to_string(), "*");
    }

    #[test]
    fn test_path_round_trip() {
        assert!(Topic::from_path("*").is_broadcast());
        assert_eq!(Topic::from_path("node").as_str(), "node");
        assert_eq!(Topic::from_path("node").to_path(), "node");
    }
}

//! Incremental decoder for the runtime's event stream.
//!
//! The runtime writes one JSON object per event, usually newline-terminated,
//! and chunk boundaries fall anywhere. Partial objects are buffered until the
//! rest arrives.

use bytes::BytesMut;
use harbor_events::RawEvent;

use crate::error::RuntimeError;

/// Result of feeding one chunk.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Events completed by the chunk, in stream order.
    pub events: Vec<RawEvent>,
    /// Set when malformed input followed `events`.
    pub error: Option<RuntimeError>,
}

#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: BytesMut,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    ///
    /// Malformed input is unrecoverable: the buffer is dropped and the error
    /// reported after the events decoded ahead of it.
    pub fn push(&mut self, chunk: &[u8]) -> Decoded {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;
        let mut failure = None;

        let mut iter = serde_json::Deserializer::from_slice(&self.buf).into_iter::<RawEvent>();
        loop {
            match iter.next() {
                Some(Ok(event)) => {
                    events.push(event);
                    consumed = iter.byte_offset();
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                None => {
                    consumed = iter.byte_offset();
                    break;
                }
            }
        }

        if let Some(e) = failure {
            self.buf.clear();
            return Decoded {
                events,
                error: Some(RuntimeError::Decode(e.to_string())),
            };
        }

        let _ = self.buf.split_to(consumed);
        Decoded {
            events,
            error: None,
        }
    }

    /// Bytes buffered while waiting for the rest of an object.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = r#"{"status":"start","id":"abc","Type":"container","Action":"start"}"#;
    const DIE: &str = r#"{"status":"die","id":"abc","Type":"container","Action":"die"}"#;

    #[test]
    fn test_decodes_newline_delimited() {
        let mut decoder = EventDecoder::new();
        let decoded = decoder.push(format!("{START}\n{DIE}\n").as_bytes());
        assert!(decoded.error.is_none());

        let events = decoded.events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "start");
        assert_eq!(events[1].action, "die");
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decodes_concatenated() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(format!("{START}{DIE}").as_bytes()).events;
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_buffers_partial_object() {
        let mut decoder = EventDecoder::new();
        let (head, tail) = START.split_at(20);

        assert!(decoder.push(head.as_bytes()).events.is_empty());
        assert_eq!(decoder.pending(), head.len());

        let events = decoder.push(format!("{tail}\n").as_bytes()).events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "abc");
    }

    #[test]
    fn test_malformed_input() {
        let mut decoder = EventDecoder::new();
        let decoded = decoder.push(b"{\"id\": nope}\n");
        assert!(decoded.events.is_empty());

        let err = decoded.error.unwrap();
        assert!(matches!(err, RuntimeError::Decode(_)));
        assert!(!err.is_transient());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_events_before_malformed_input_are_kept() {
        let mut decoder = EventDecoder::new();
        let decoded = decoder.push(format!("{START}\n{{\"id\": nope}}\n{DIE}\n").as_bytes());

        assert_eq!(decoded.events.len(), 1);
        assert_eq!(decoded.events[0].action, "start");
        assert!(matches!(decoded.error, Some(RuntimeError::Decode(_))));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_null_actor_attributes() {
        let mut decoder = EventDecoder::new();
        let chunk = concat!(
            r#"{"status":"start","id":"abc","Type":"container","Action":"start","#,
            r#""Actor":{"ID":"abc","Attributes":null},"time":1}"#,
            "\n",
        );

        let decoded = decoder.push(chunk.as_bytes());
        assert!(decoded.error.is_none());
        assert_eq!(decoded.events.len(), 1);
        assert!(decoded.events[0].actor.attributes.is_empty());
    }
}

//! # harbor-events
//!
//! Event model for the harbor relay.
//!
//! ## Design Principles
//!
//! - Raw runtime messages are decoded leniently: every wire field is optional
//! - Canonical events keep the runtime's core fields verbatim and only add metadata
//! - Events without an id and a type are never published
//! - The topic is derived from the event type alone
//!
//! ## Flow
//!
//! ```text
//! RawEvent ──normalize──► Event ──to_payload──► bytes
//!                           │
//!                           └──Topic::for_event──► routing key
//! ```

mod error;
mod event;
mod raw;
mod topic;

pub use error::EventError;
pub use event::Event;
pub use raw::{Actor, RawEvent, BOOTSTRAP_ID, BOOTSTRAP_STATUS};
pub use topic::Topic;

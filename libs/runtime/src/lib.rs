//! # harbor-runtime
//!
//! Client side of the container runtime.
//!
//! - [`Endpoint`]: where the runtime lives (`unix://` socket or `tcp://` host,
//!   TLS on the secure port) and how to dial it.
//! - [`TlsSettings`]: CA bundle and client key pair for secure endpoints.
//! - [`RuntimeClient`]: the engine API calls the relay and plugins need.
//! - [`EventSource`]: subscription to the runtime's event stream plus a
//!   liveness probe, implemented by [`RuntimeEventSource`].
//!
//! Every error carries a transient/fatal classification; see [`SourceError`].

mod client;
mod decoder;
mod endpoint;
mod error;
mod source;
mod tls;

pub use client::{
    ContainerConfig, ContainerInspect, ObjectVersion, RawEventStream, RuntimeClient, Service,
    SwarmInfo, SystemInfo, API_VERSION, DEFAULT_REQUEST_TIMEOUT,
};
pub use decoder::{Decoded, EventDecoder};
pub use endpoint::{
    BoxedIo, Endpoint, RuntimeIo, Scheme, DEFAULT_URL, HOST_ENV, PLAIN_PORT, SECURE_PORT,
    UNIX_HOST,
};
pub use error::{ConfigError, RuntimeError, SourceError};
pub use source::{EventSource, RuntimeEventSource, Subscription, EVENT_BUFFER};
pub use tls::{TlsSettings, CERT_PATH_ENV, TLS_VERIFY_ENV};

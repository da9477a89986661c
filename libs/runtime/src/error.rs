//! Runtime error types.
//!
//! Errors carry their own recovery classification. Callers decide whether to
//! retry by asking [`RuntimeError::is_transient`] or [`SourceError::is_transient`],
//! never by inspecting message text.

use thiserror::Error;

/// The runtime endpoint or its TLS material is unusable. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported runtime scheme: {0:?} (expected unix or tcp)")]
    UnsupportedScheme(String),

    #[error("invalid runtime url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("missing TLS material: {0}")]
    MissingTlsMaterial(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A call to the runtime's engine API failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime could not be dialed.
    #[error("connect error: {0}")]
    Connect(String),

    /// A connect or request deadline passed.
    #[error("request timed out")]
    Timeout,

    /// The connection broke while talking HTTP.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The runtime answered with a non-success status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The runtime's response did not decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RuntimeError {
    /// Whether retrying after the runtime recovers can succeed.
    ///
    /// Connectivity failures and 5xx answers are transient. A 5xx is what the
    /// runtime returns while it is unavailable, e.g. during a manager election.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout | Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Decode(_) | Self::InvalidRequest(_) => false,
        }
    }
}

/// Failure reported by an event source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The runtime is unreachable or not ready.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// The event stream ended.
    #[error("event stream closed")]
    StreamClosed,

    /// A failure that retrying will not fix.
    #[error("fatal source error: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}

impl From<RuntimeError> for SourceError {
    fn from(err: RuntimeError) -> Self {
        if err.is_transient() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

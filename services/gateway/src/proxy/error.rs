use axum::response::{IntoResponse, Response};
use harbor_runtime::RuntimeError;
use thiserror::Error;

use crate::problem::ApiError;

/// A proxied request that never got an upstream response.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The runtime could not be reached.
    #[error("dial runtime: {0}")]
    Dial(#[source] RuntimeError),

    /// The connection broke during the round trip.
    #[error("upstream: {0}")]
    Upstream(String),

    /// The incoming request cannot be forwarded as is.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn to_api_error(&self) -> ApiError {
        match self {
            ProxyError::Dial(e) => {
                ApiError::bad_gateway("runtime_unreachable", self.to_string())
                    .retryable(e.is_transient())
            }
            ProxyError::Upstream(_) => {
                ApiError::bad_gateway("upstream_failed", self.to_string()).retryable(true)
            }
            ProxyError::InvalidRequest(_) => {
                ApiError::bad_request("invalid_request", self.to_string())
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.to_api_error().into_response()
    }
}

//! Reverse proxy to the runtime's engine API.
//!
//! Every request goes through the same pipeline:
//!
//! 1. hop-by-hop headers are removed and the client is appended to
//!    `X-Forwarded-For`
//! 2. the [`Director`] picks the upstream target: unix endpoints keep the
//!    caller's `Host`, tcp endpoints are retargeted at the runtime's authority
//!    and base path
//! 3. a fresh connection is dialed (socket, TCP or TLS) and the request is
//!    sent in origin form
//! 4. the upstream response is returned with its hop-by-hop headers removed
//!
//! Failures before a response arrives become `502` problem documents. There
//! are no retries, and protocol upgrades (attach, exec) are not supported.

mod director;
mod error;
mod headers;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use harbor_runtime::Endpoint;
use http::header::HOST;
use tracing::{debug, warn};

use crate::metrics::GatewayStats;

pub use director::{join_path, unix_effective_uri, Director, Target};
pub use error::ProxyError;
pub use headers::{append_forwarded_for, remove_hop_by_hop};

/// Path prefix the proxy is mounted under.
pub const MOUNT: &str = "/proxy";

/// Forwards requests to one runtime endpoint.
#[derive(Debug, Clone)]
pub struct Gateway {
    endpoint: Arc<Endpoint>,
    director: Director,
    stats: Arc<GatewayStats>,
}

impl Gateway {
    pub fn new(endpoint: Endpoint, stats: Arc<GatewayStats>) -> Self {
        let director = Director::for_endpoint(&endpoint);
        Self {
            endpoint: Arc::new(endpoint),
            director,
            stats,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Forward one request. Its URI must already be relative to the runtime.
    pub async fn forward(
        &self,
        request: Request,
        client: Option<IpAddr>,
    ) -> Result<Response, ProxyError> {
        GatewayStats::incr(&self.stats.proxy_requests);

        let result = self.round_trip(request, client).await;
        if let Err(e) = &result {
            GatewayStats::incr(&self.stats.proxy_errors);
            warn!(
                error = %e,
                endpoint = %self.endpoint.address(),
                "Proxy request failed"
            );
        }
        result
    }

    async fn round_trip(
        &self,
        request: Request,
        client: Option<IpAddr>,
    ) -> Result<Response, ProxyError> {
        let (mut parts, body) = request.into_parts();

        remove_hop_by_hop(&mut parts.headers);
        if let Some(client) = client {
            append_forwarded_for(&mut parts.headers, client);
        }

        let target = self.director.target(&parts)?;
        debug!(method = %parts.method, uri = %target.uri, "Proxying request");

        parts.uri = target.origin_form()?;
        parts.headers.insert(HOST, target.host);
        let upstream = http::Request::from_parts(parts, body);

        let mut sender = self
            .endpoint
            .connect::<Body>()
            .await
            .map_err(ProxyError::Dial)?;
        let response = sender
            .send_request(upstream)
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        remove_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// axum handler for everything under [`MOUNT`].
pub async fn handle(State(gateway): State<Gateway>, mut request: Request) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Err(e) = strip_mount(&mut request) {
        return e.into_response();
    }

    match gateway.forward(request, client).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

fn strip_mount(request: &mut Request) -> Result<(), ProxyError> {
    let path = request.uri().path();
    let rest = path.strip_prefix(MOUNT).unwrap_or(path);
    let rest = if rest.is_empty() { "/" } else { rest };

    let path_and_query = match request.uri().query() {
        Some(query) => format!("{rest}?{query}"),
        None => rest.to_string(),
    };

    *request.uri_mut() = path_and_query
        .parse()
        .map_err(|e: http::uri::InvalidUri| ProxyError::InvalidRequest(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_mount() {
        let mut request = Request::new(Body::empty());
        *request.uri_mut() = "/proxy/containers/json?all=1".parse().unwrap();
        strip_mount(&mut request).unwrap();
        assert_eq!(request.uri().to_string(), "/containers/json?all=1");

        *request.uri_mut() = "/proxy".parse().unwrap();
        strip_mount(&mut request).unwrap();
        assert_eq!(request.uri().to_string(), "/");
    }

    #[test]
    fn test_errors_render_as_problems() {
        let response = ProxyError::Upstream("connection reset".to_string()).into_response();
        assert_eq!(response.status(), http::StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers()["content-type"],
            "application/problem+json"
        );

        let response = ProxyError::InvalidRequest("bad uri".to_string()).into_response();
        assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
    }
}

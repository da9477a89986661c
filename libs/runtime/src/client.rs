//! Engine API client.
//!
//! Speaks the runtime's versioned HTTP API over a fresh connection per call.
//! Unary calls are bounded by a request timeout; the event stream is not.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::stream::unfold;
use harbor_events::RawEvent;
use http::header::{ACCEPT, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::decoder::EventDecoder;
use crate::endpoint::Endpoint;
use crate::error::RuntimeError;

/// Engine API version every request is pinned to.
pub const API_VERSION: &str = "1.35";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Decoded runtime events, in the order the runtime emitted them.
pub type RawEventStream = Pin<Box<dyn Stream<Item = Result<RawEvent, RuntimeError>> + Send>>;

/// Subset of `GET /info`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfo {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub swarm: SwarmInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwarmInfo {
    #[serde(rename = "NodeID", default)]
    pub node_id: String,
    #[serde(default)]
    pub local_node_state: String,
    #[serde(default)]
    pub control_available: bool,
}

/// Subset of `GET /containers/{id}/json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: ContainerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    /// `null` on the wire when the container has no labels.
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

impl ContainerInspect {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config.labels.as_ref()?.get(key).map(String::as_str)
    }
}

/// A swarm service. The spec is kept verbatim so it can be resubmitted unchanged.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Service {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub version: ObjectVersion,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Service {
    pub fn name(&self) -> Option<&str> {
        self.spec.get("Name")?.as_str()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectVersion {
    #[serde(default)]
    pub index: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Client for the runtime's engine API. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    endpoint: Endpoint,
    user_agent: String,
    request_timeout: Duration,
}

impl RuntimeClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            user_agent: format!("harbor/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn info(&self) -> Result<SystemInfo, RuntimeError> {
        self.get_json("/info").await
    }

    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.unary(Method::GET, "/_ping", None).await.map(|_| ())
    }

    /// Open the event stream.
    pub async fn events(&self) -> Result<RawEventStream, RuntimeError> {
        let request = self.request(Method::GET, "/events", None)?;
        let response = tokio::time::timeout(self.request_timeout, self.send(request))
            .await
            .map_err(|_| RuntimeError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let body = collect(response).await?;
            return Err(api_error(status, &body));
        }

        debug!("Runtime event stream opened");
        Ok(event_stream(response.into_body()))
    }

    pub async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let path = format!("/containers/{}/start", encode(id));
        match self.unary(Method::POST, &path, None).await {
            Ok(_) => Ok(()),
            // Already running.
            Err(RuntimeError::Api { status: 304, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, RuntimeError> {
        self.get_json(&format!("/containers/{}/json", encode(id)))
            .await
    }

    /// List services, optionally filtered by name.
    ///
    /// The runtime's name filter matches prefixes, so callers wanting an exact
    /// match must check [`Service::name`].
    pub async fn list_services(&self, name: Option<&str>) -> Result<Vec<Service>, RuntimeError> {
        let path = match name {
            Some(name) => {
                let filters = serde_json::json!({ "name": [name] }).to_string();
                format!("/services?filters={}", encode(&filters))
            }
            None => "/services".to_string(),
        };
        self.get_json(&path).await
    }

    /// Submit `spec` as the new spec of service `id` at `version`.
    pub async fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &serde_json::Value,
    ) -> Result<(), RuntimeError> {
        let path = format!("/services/{}/update?version={version}", encode(id));
        let body =
            serde_json::to_vec(spec).map_err(|e| RuntimeError::InvalidRequest(e.to_string()))?;
        self.unary(Method::POST, &path, Some(Bytes::from(body)))
            .await
            .map(|_| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RuntimeError> {
        let body = self.unary(Method::GET, path, None).await?;
        serde_json::from_slice(&body).map_err(|e| RuntimeError::Decode(e.to_string()))
    }

    async fn unary(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<Bytes, RuntimeError> {
        let request = self.request(method.clone(), path, body)?;

        tokio::time::timeout(self.request_timeout, async {
            let response = self.send(request).await?;
            let status = response.status();
            let body = collect(response).await?;

            if status.is_success() {
                Ok(body)
            } else {
                let err = api_error(status, &body);
                error!(method = %method, path = %path, error = %err, "Runtime API error");
                Err(err)
            }
        })
        .await
        .map_err(|_| RuntimeError::Timeout)?
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<Request<Full<Bytes>>, RuntimeError> {
        let uri = format!("{}/v{API_VERSION}{path}", self.endpoint.base_path());
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(HOST, self.endpoint.authority())
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json");

        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }

        builder
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|e| RuntimeError::InvalidRequest(e.to_string()))
    }

    async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, RuntimeError> {
        debug!(method = %request.method(), uri = %request.uri(), "Runtime API request");
        let mut sender = self.endpoint.connect().await?;
        sender
            .send_request(request)
            .await
            .map_err(|e| RuntimeError::Http(e.to_string()))
    }
}

async fn collect(response: Response<Incoming>) -> Result<Bytes, RuntimeError> {
    response
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| RuntimeError::Http(e.to_string()))
}

fn api_error(status: StatusCode, body: &[u8]) -> RuntimeError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|body| body.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    RuntimeError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Percent-encode everything outside the unreserved set.
fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

struct StreamState {
    body: Incoming,
    decoder: EventDecoder,
    pending: VecDeque<RawEvent>,
    failure: Option<RuntimeError>,
    done: bool,
}

fn event_stream(body: Incoming) -> RawEventStream {
    let state = StreamState {
        body,
        decoder: EventDecoder::new(),
        pending: VecDeque::new(),
        failure: None,
        done: false,
    };

    let stream = unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            // Reported only once the events decoded ahead of it are out.
            if let Some(e) = st.failure.take() {
                st.done = true;
                return Some((Err(e), st));
            }
            if st.done {
                return None;
            }

            match st.body.frame().await {
                Some(Ok(frame)) => {
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    let decoded = st.decoder.push(&data);
                    st.pending.extend(decoded.events);
                    st.failure = decoded.error;
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(RuntimeError::Http(e.to_string())), st));
                }
                None => st.done = true,
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        assert_eq!(encode("abc-1.2_3~"), "abc-1.2_3~");
        assert_eq!(
            encode(r#"{"name":["web"]}"#),
            "%7B%22name%22%3A%5B%22web%22%5D%7D"
        );
    }

    #[test]
    fn test_api_error_message() {
        let err = api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"message":"No primary manager elected"}"#,
        );
        assert_eq!(
            err,
            RuntimeError::Api {
                status: 500,
                message: "No primary manager elected".to_string()
            }
        );

        let err = api_error(StatusCode::BAD_GATEWAY, b"upstream down\n");
        assert_eq!(
            err,
            RuntimeError::Api {
                status: 502,
                message: "upstream down".to_string()
            }
        );
    }

    #[test]
    fn test_container_labels() {
        let inspect: ContainerInspect = serde_json::from_str(
            r#"{"Id":"abc","Name":"/web","Config":{"Labels":{"harbor.role":"edge"}}}"#,
        )
        .unwrap();
        assert_eq!(inspect.label("harbor.role"), Some("edge"));
        assert_eq!(inspect.label("missing"), None);

        let inspect: ContainerInspect =
            serde_json::from_str(r#"{"Id":"abc","Config":{"Labels":null}}"#).unwrap();
        assert_eq!(inspect.label("harbor.role"), None);
    }

    #[test]
    fn test_service_keeps_spec() {
        let service: Service = serde_json::from_str(
            r#"{"ID":"s1","Version":{"Index":42},"Spec":{"Name":"web","Labels":{"a":"b"},"TaskTemplate":{"ForceUpdate":1}}}"#,
        )
        .unwrap();
        assert_eq!(service.version.index, 42);
        assert_eq!(service.name(), Some("web"));
        assert_eq!(service.spec["Labels"]["a"], "b");
    }
}

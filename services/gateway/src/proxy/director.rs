use harbor_runtime::{Endpoint, Scheme, UNIX_HOST};
use http::header::{HeaderValue, HOST};
use http::request::Parts;
use http::Uri;

use super::ProxyError;

/// Where one request goes and how it names its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Effective request URI, `scheme://authority/path?query`.
    pub uri: Uri,
    pub host: HeaderValue,
}

impl Target {
    /// Origin-form request target written on the wire.
    pub fn origin_form(&self) -> Result<Uri, ProxyError> {
        let path_and_query = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        path_and_query
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::InvalidRequest(e.to_string()))
    }
}

/// Rewrites incoming requests for one runtime endpoint.
#[derive(Debug, Clone)]
pub enum Director {
    /// Requests keep their own `Host`; the socket is dialed per request.
    Unix,
    /// Requests are retargeted at the runtime's authority and base path.
    Tcp {
        scheme: &'static str,
        authority: String,
        base_path: String,
    },
}

impl Director {
    pub fn for_endpoint(endpoint: &Endpoint) -> Self {
        match endpoint.scheme() {
            Scheme::Unix => Director::Unix,
            Scheme::Tcp => Director::Tcp {
                scheme: endpoint.http_scheme(),
                authority: endpoint.address().to_string(),
                base_path: endpoint.base_path().to_string(),
            },
        }
    }

    /// Compute the upstream target for a request whose path has already had
    /// the gateway's mount prefix removed.
    pub fn target(&self, parts: &Parts) -> Result<Target, ProxyError> {
        let path = parts.uri.path();
        let query = parts.uri.query();

        match self {
            Director::Unix => {
                let host = parts
                    .headers
                    .get(HOST)
                    .cloned()
                    .or_else(|| {
                        parts
                            .uri
                            .authority()
                            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
                    })
                    .unwrap_or_else(|| HeaderValue::from_static(UNIX_HOST));
                let authority = host
                    .to_str()
                    .map_err(|_| ProxyError::InvalidRequest("non-ascii Host header".to_string()))?;
                let uri = unix_effective_uri(authority, path, query)?;
                Ok(Target { uri, host })
            }
            Director::Tcp {
                scheme,
                authority,
                base_path,
            } => {
                let joined = join_path(base_path, path);
                let uri = build_uri(scheme, authority, &joined, query)?;
                let host = HeaderValue::from_str(authority)
                    .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
                Ok(Target { uri, host })
            }
        }
    }
}

/// `http://<host>/<path>?<query>` with exactly one slash after the host and
/// a `?` only when there is a query.
pub fn unix_effective_uri(host: &str, path: &str, query: Option<&str>) -> Result<Uri, ProxyError> {
    build_uri("http", host, &format!("/{}", path.trim_start_matches('/')), query)
}

/// Join a base path and a request path with a single slash.
pub fn join_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn build_uri(
    scheme: &str,
    authority: &str,
    path: &str,
    query: Option<&str>,
) -> Result<Uri, ProxyError> {
    let uri = match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{scheme}://{authority}{path}?{query}"),
        None => format!("{scheme}://{authority}{path}"),
    };
    uri.parse()
        .map_err(|e: http::uri::InvalidUri| ProxyError::InvalidRequest(format!("{uri}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::Request;

    fn parts(uri: &str, host: Option<&str>) -> Parts {
        let mut builder = Request::get(uri);
        if let Some(host) = host {
            builder = builder.header(HOST, host);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_unix_keeps_original_host() {
        let director =
            Director::for_endpoint(&Endpoint::parse("unix:///var/run/x.sock", None).unwrap());
        let target = director
            .target(&parts("/containers/json?all=1", Some("docker")))
            .unwrap();

        assert_eq!(target.uri.to_string(), "http://docker/containers/json?all=1");
        assert_eq!(target.host, "docker");
        assert_eq!(target.origin_form().unwrap().to_string(), "/containers/json?all=1");
    }

    #[test]
    fn test_unix_without_query_or_host() {
        let director = Director::Unix;
        let target = director.target(&parts("/_ping", None)).unwrap();
        assert_eq!(target.uri.to_string(), "http://docker/_ping");
    }

    #[test]
    fn test_tcp_rewrites_authority_and_joins_base_path() {
        let endpoint = Endpoint::parse("tcp://10.0.0.5:2375/engine/", None).unwrap();
        let director = Director::for_endpoint(&endpoint);
        let target = director
            .target(&parts("/containers/json?all=1", Some("gateway.local")))
            .unwrap();

        assert_eq!(
            target.uri.to_string(),
            "http://10.0.0.5:2375/engine/containers/json?all=1"
        );
        assert_eq!(target.host, "10.0.0.5:2375");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "/info"), "/info");
        assert_eq!(join_path("/base/", "/info"), "/base/info");
        assert_eq!(join_path("/base", "info"), "/base/info");
        assert_eq!(join_path("", ""), "/");
    }
}

use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::stream::unfold;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::tls::TlsFixture;

type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// A request as the fake runtime received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Request target exactly as sent (origin form for well-behaved clients).
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The TLS peer presented a client certificate.
    pub client_cert: bool,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
struct Canned {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

#[derive(Default)]
struct Shared {
    requests: Mutex<Vec<RecordedRequest>>,
    routes: Mutex<HashMap<(Method, String), Canned>>,
    event_streams: Mutex<Vec<mpsc::UnboundedSender<Bytes>>>,
    event_streams_opened: Mutex<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Address {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

/// HTTP server standing in for the runtime's engine API.
///
/// Requests are recorded and answered from canned responses keyed by method
/// and path (query ignored). `GET .../events` without a canned response opens
/// an event stream fed by [`FakeRuntime::emit`]. Anything else is a 404.
pub struct FakeRuntime {
    shared: Arc<Shared>,
    address: Address,
    shutdown: CancellationToken,
    _dir: Option<TempDir>,
}

impl FakeRuntime {
    /// Serve on a unix socket in a fresh temporary directory.
    pub async fn start_unix() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("runtime.sock");
        let listener = UnixListener::bind(&path)?;

        let runtime = Self::new(Address::Unix(path), Some(dir));
        let shared = Arc::clone(&runtime.shared);
        let shutdown = runtime.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => serve(stream, Arc::clone(&shared), false),
                        Err(_) => break,
                    },
                }
            }
        });

        Ok(runtime)
    }

    /// Serve plain HTTP on a random loopback port.
    pub async fn start_tcp() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let runtime = Self::new(Address::Tcp(listener.local_addr()?), None);
        let shared = Arc::clone(&runtime.shared);
        let shutdown = runtime.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => serve(stream, Arc::clone(&shared), false),
                        Err(_) => break,
                    },
                }
            }
        });

        Ok(runtime)
    }

    /// Serve HTTPS on a random loopback port, requiring a client certificate
    /// signed by the fixture's CA.
    pub async fn start_tls(fixture: &TlsFixture) -> io::Result<Self> {
        let acceptor = TlsAcceptor::from(fixture.server_config()?);
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let runtime = Self::new(Address::Tcp(listener.local_addr()?), None);
        let shared = Arc::clone(&runtime.shared);
        let shutdown = runtime.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            let acceptor = acceptor.clone();
                            let shared = Arc::clone(&shared);
                            tokio::spawn(async move {
                                if let Ok(tls) = acceptor.accept(stream).await {
                                    let client_cert = tls.get_ref().1.peer_certificates().is_some();
                                    serve(tls, shared, client_cert);
                                }
                            });
                        }
                        Err(_) => break,
                    },
                }
            }
        });

        Ok(runtime)
    }

    fn new(address: Address, dir: Option<TempDir>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            address,
            shutdown: CancellationToken::new(),
            _dir: dir,
        }
    }

    /// `unix://<path>` or `tcp://127.0.0.1:<port>`.
    pub fn url(&self) -> String {
        match &self.address {
            Address::Unix(path) => format!("unix://{}", path.display()),
            Address::Tcp(addr) => format!("tcp://{addr}"),
        }
    }

    pub fn socket_path(&self) -> Option<&Path> {
        match &self.address {
            Address::Unix(path) => Some(path),
            Address::Tcp(_) => None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.address {
            Address::Unix(_) => None,
            Address::Tcp(addr) => Some(*addr),
        }
    }

    /// Answer `method path` with `status` and a JSON `body`.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: impl Into<Bytes>) {
        self.respond_with_headers(
            method,
            path,
            status,
            &[("content-type", "application/json")],
            body,
        );
    }

    pub fn respond_with_headers(
        &self,
        method: Method,
        path: &str,
        status: u16,
        headers: &[(&str, &str)],
        body: impl Into<Bytes>,
    ) {
        let canned = Canned {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: headers
                .iter()
                .filter_map(|(name, value)| {
                    Some((
                        HeaderName::from_bytes(name.as_bytes()).ok()?,
                        HeaderValue::from_str(value).ok()?,
                    ))
                })
                .collect(),
            body: body.into(),
        };
        lock(&self.shared.routes).insert((method, path.to_string()), canned);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.shared.requests).clone()
    }

    /// Event streams opened so far.
    pub fn event_streams_opened(&self) -> usize {
        *lock(&self.shared.event_streams_opened)
    }

    /// Write `chunk` to every open event stream.
    pub fn emit(&self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        lock(&self.shared.event_streams).retain(|tx| tx.send(chunk.clone()).is_ok());
    }

    /// End every open event stream.
    pub fn close_event_streams(&self) {
        lock(&self.shared.event_streams).clear();
    }
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn serve<S>(io: S, shared: Arc<Shared>, client_cert: bool)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let service = service_fn(move |request| handle(Arc::clone(&shared), client_cert, request));
        let _ = http1::Builder::new()
            .serve_connection(TokioIo::new(io), service)
            .await;
    });
}

async fn handle(
    shared: Arc<Shared>,
    client_cert: bool,
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, Infallible> {
    let (parts, body) = request.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let path = parts.uri.path().to_string();
    lock(&shared.requests).push(RecordedRequest {
        method: parts.method.clone(),
        uri: parts.uri,
        headers: parts.headers,
        body,
        client_cert,
    });

    let canned = lock(&shared.routes)
        .get(&(parts.method.clone(), path.clone()))
        .cloned();

    if let Some(canned) = canned {
        let mut response = Response::new(Full::new(canned.body).boxed_unsync());
        *response.status_mut() = canned.status;
        for (name, value) in canned.headers {
            response.headers_mut().insert(name, value);
        }
        return Ok(response);
    }

    if parts.method == Method::GET && path.ends_with("/events") {
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        lock(&shared.event_streams).push(tx);
        *lock(&shared.event_streams_opened) += 1;

        let frames = unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, Infallible>(Frame::data(chunk)), rx))
        });
        let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        return Ok(response);
    }

    let mut response = Response::new(
        Full::new(Bytes::from_static(br#"{"message":"page not found"}"#)).boxed_unsync(),
    );
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

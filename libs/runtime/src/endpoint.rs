//! Runtime endpoint addressing and connection dialing.
//!
//! An [`Endpoint`] is fixed at construction time. Every call to
//! [`Endpoint::connect`] dials a fresh connection and performs an HTTP/1.1
//! handshake on it; connections are never pooled.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Uri;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{ConfigError, RuntimeError};

/// Default runtime endpoint.
pub const DEFAULT_URL: &str = "unix:///var/run/docker.sock";

/// Environment variable naming the runtime endpoint.
pub const HOST_ENV: &str = "DOCKER_HOST";

/// The runtime's well-known plain HTTP port.
pub const PLAIN_PORT: u16 = 2375;

/// The runtime's well-known TLS port.
pub const SECURE_PORT: u16 = 2376;

/// Virtual host used for requests over a unix socket when the caller has none.
pub const UNIX_HOST: &str = "docker";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the runtime is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Local domain socket.
    Unix,
    /// Host-addressed TCP, TLS on the secure port.
    Tcp,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix => write!(f, "unix"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// A byte stream to the runtime.
pub trait RuntimeIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RuntimeIo for T {}

pub type BoxedIo = Box<dyn RuntimeIo>;

/// Where the runtime's engine API lives.
#[derive(Debug, Clone)]
pub struct Endpoint {
    scheme: Scheme,
    /// Socket path (unix) or `host:port` authority (tcp).
    address: String,
    host: String,
    port: u16,
    base_path: String,
    tls: Option<Arc<ClientConfig>>,
    server_name: Option<ServerName<'static>>,
    connect_timeout: Duration,
}

impl Endpoint {
    /// Parse `unix://<path>` or `tcp://<host>[:port][/base-path]`.
    ///
    /// A tcp endpoint on [`SECURE_PORT`] is spoken to over TLS and requires
    /// `tls`. Without a port, the secure port is used when `tls` is given and
    /// the plain port otherwise.
    pub fn parse(url: &str, tls: Option<Arc<ClientConfig>>) -> Result<Self, ConfigError> {
        Self::parse_with_secure_port(url, tls, SECURE_PORT)
    }

    /// Like [`Endpoint::parse`] with a non-standard TLS port.
    pub fn parse_with_secure_port(
        url: &str,
        tls: Option<Arc<ClientConfig>>,
        secure_port: u16,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;

        match scheme {
            "unix" => {
                if rest.is_empty() {
                    return Err(invalid("missing socket path"));
                }
                Ok(Self {
                    scheme: Scheme::Unix,
                    address: rest.to_string(),
                    host: UNIX_HOST.to_string(),
                    port: 0,
                    base_path: String::new(),
                    tls: None,
                    server_name: None,
                    connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                })
            }
            "tcp" => {
                let uri: Uri = format!("http://{rest}")
                    .parse()
                    .map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
                let host = uri
                    .host()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| invalid("missing host"))?;
                let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

                let port = match uri.port_u16() {
                    Some(port) => port,
                    None if tls.is_some() => SECURE_PORT,
                    None => PLAIN_PORT,
                };

                let (tls, server_name) = if port == secure_port {
                    let config = tls.ok_or_else(|| {
                        ConfigError::MissingTlsMaterial(format!(
                            "port {port} requires a client certificate, key and CA"
                        ))
                    })?;
                    let server_name = ServerName::try_from(host.clone())
                        .map_err(|e| invalid(&e.to_string()))?;
                    (Some(config), Some(server_name))
                } else {
                    (None, None)
                };

                let address = if host.contains(':') {
                    format!("[{host}]:{port}")
                } else {
                    format!("{host}:{port}")
                };

                Ok(Self {
                    scheme: Scheme::Tcp,
                    address,
                    host,
                    port,
                    base_path: uri.path().trim_end_matches('/').to_string(),
                    tls,
                    server_name,
                    connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                })
            }
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Socket path (unix) or `host:port` (tcp).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Path prefix every request is joined onto. Empty or `/segment...`.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// `https` when TLS is active, `http` otherwise.
    pub fn http_scheme(&self) -> &'static str {
        if self.is_tls() {
            "https"
        } else {
            "http"
        }
    }

    /// Value for the `Host` header of requests this crate originates.
    pub fn authority(&self) -> &str {
        match self.scheme {
            Scheme::Unix => UNIX_HOST,
            Scheme::Tcp => &self.address,
        }
    }

    /// Open a byte stream to the runtime, bounded by the connect timeout.
    pub async fn dial(&self) -> Result<BoxedIo, RuntimeError> {
        tokio::time::timeout(self.connect_timeout, self.dial_inner())
            .await
            .map_err(|_| RuntimeError::Timeout)?
    }

    async fn dial_inner(&self) -> Result<BoxedIo, RuntimeError> {
        match self.scheme {
            Scheme::Unix => {
                let stream = UnixStream::connect(&self.address)
                    .await
                    .map_err(|e| RuntimeError::Connect(format!("{}: {e}", self.address)))?;
                Ok(Box::new(stream))
            }
            Scheme::Tcp => {
                let stream = TcpStream::connect((self.host.as_str(), self.port))
                    .await
                    .map_err(|e| RuntimeError::Connect(format!("{}: {e}", self.address)))?;
                let _ = stream.set_nodelay(true);

                match (&self.tls, &self.server_name) {
                    (Some(config), Some(server_name)) => {
                        let connector = TlsConnector::from(Arc::clone(config));
                        let stream = connector
                            .connect(server_name.clone(), stream)
                            .await
                            .map_err(|e| {
                                RuntimeError::Connect(format!("{}: TLS: {e}", self.address))
                            })?;
                        Ok(Box::new(stream))
                    }
                    _ => Ok(Box::new(stream)),
                }
            }
        }
    }

    /// Dial and perform an HTTP/1.1 handshake.
    ///
    /// The connection is driven by a background task that ends when the
    /// returned sender and any in-flight response are dropped.
    pub async fn connect<B>(&self) -> Result<SendRequest<B>, RuntimeError>
    where
        B: hyper::body::Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let io = self.dial().await?;
        let (sender, conn) = http1::handshake(TokioIo::new(io))
            .await
            .map_err(|e| RuntimeError::Http(e.to_string()))?;

        let address = self.address.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(address = %address, error = %e, "Runtime connection ended with error");
            }
        });

        Ok(sender)
    }
}

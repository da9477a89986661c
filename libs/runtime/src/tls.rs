//! TLS material for secure runtime endpoints.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Environment variable naming a directory holding `ca.pem`, `cert.pem` and `key.pem`.
pub const CERT_PATH_ENV: &str = "DOCKER_CERT_PATH";

/// Environment variable that enables the [`CERT_PATH_ENV`] fallback.
pub const TLS_VERIFY_ENV: &str = "DOCKER_TLS_VERIFY";

/// Paths to the CA bundle and client key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub ca_cert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    /// `false` accepts any server certificate.
    pub verify: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_cert: None,
            cert: None,
            key: None,
            verify: true,
        }
    }
}

impl TlsSettings {
    /// Fall back to the runtime client's standard environment when no path
    /// was given explicitly.
    pub fn resolve<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.is_empty() {
            return self;
        }

        let non_empty = |name: &str| env(name).filter(|value| !value.is_empty());
        if let (Some(dir), Some(_)) = (non_empty(CERT_PATH_ENV), non_empty(TLS_VERIFY_ENV)) {
            let dir = PathBuf::from(dir);
            debug!(cert_path = %dir.display(), "Using TLS material from environment");
            self.ca_cert = Some(dir.join("ca.pem"));
            self.cert = Some(dir.join("cert.pem"));
            self.key = Some(dir.join("key.pem"));
        }
        self
    }

    /// No path configured at all.
    pub fn is_empty(&self) -> bool {
        self.ca_cert.is_none() && self.cert.is_none() && self.key.is_none()
    }

    /// Build the client configuration.
    ///
    /// Returns `Ok(None)` when no material is configured. A client key pair is
    /// always required; the CA bundle is required unless verification is off.
    pub fn load(&self) -> Result<Option<Arc<ClientConfig>>, ConfigError> {
        if self.is_empty() {
            return Ok(None);
        }

        let (cert_path, key_path) = match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(ConfigError::MissingTlsMaterial(
                    "both a client certificate and key are required".to_string(),
                ))
            }
        };

        let chain = read_certs(cert_path)?;
        let key = read_key(key_path)?;

        let provider = Arc::new(crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigError::Tls(e.to_string()))?;

        let result = if self.verify {
            let ca_path = self.ca_cert.as_ref().ok_or_else(|| {
                ConfigError::MissingTlsMaterial(
                    "a CA certificate is required when verification is enabled".to_string(),
                )
            })?;

            let mut roots = RootCertStore::empty();
            for cert in read_certs(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| ConfigError::Tls(format!("{}: {e}", ca_path.display())))?;
            }

            builder
                .with_root_certificates(roots)
                .with_client_auth_cert(chain, key)
        } else {
            warn!("Runtime TLS certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(&provider)))
                .with_client_auth_cert(chain, key)
        };
        let config = result.map_err(|e| ConfigError::Tls(e.to_string()))?;

        Ok(Some(Arc::new(config)))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, ConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(ConfigError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| ConfigError::Tls(format!("{}: no private key found", path.display())))
}

/// Accepts any server certificate. Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn write_key_pair(dir: &Path) -> (PathBuf, PathBuf) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        std::fs::write(&cert, certified.cert.pem()).unwrap();
        std::fs::write(&key, certified.key_pair.serialize_pem()).unwrap();
        (cert, key)
    }

    #[test]
    fn test_resolve_uses_cert_path_env() {
        let settings = TlsSettings::default().resolve(env(&[
            ("DOCKER_CERT_PATH", "/certs"),
            ("DOCKER_TLS_VERIFY", "1"),
        ]));
        assert_eq!(settings.ca_cert, Some(PathBuf::from("/certs/ca.pem")));
        assert_eq!(settings.cert, Some(PathBuf::from("/certs/cert.pem")));
        assert_eq!(settings.key, Some(PathBuf::from("/certs/key.pem")));
    }

    #[test]
    fn test_resolve_requires_verify_env() {
        let settings = TlsSettings::default().resolve(env(&[("DOCKER_CERT_PATH", "/certs")]));
        assert!(settings.is_empty());
    }

    #[test]
    fn test_resolve_keeps_explicit_paths() {
        let settings = TlsSettings {
            cert: Some(PathBuf::from("/mine/cert.pem")),
            ..Default::default()
        }
        .resolve(env(&[
            ("DOCKER_CERT_PATH", "/certs"),
            ("DOCKER_TLS_VERIFY", "1"),
        ]));
        assert_eq!(settings.cert, Some(PathBuf::from("/mine/cert.pem")));
        assert!(settings.ca_cert.is_none());
    }

    #[test]
    fn test_load_without_material() {
        assert!(TlsSettings::default().load().unwrap().is_none());
    }

    #[test]
    fn test_load_partial_material() {
        let settings = TlsSettings {
            ca_cert: Some(PathBuf::from("/certs/ca.pem")),
            ..Default::default()
        };
        assert!(matches!(
            settings.load(),
            Err(ConfigError::MissingTlsMaterial(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = TlsSettings {
            ca_cert: Some(dir.path().join("ca.pem")),
            cert: Some(dir.path().join("cert.pem")),
            key: Some(dir.path().join("key.pem")),
            verify: true,
        };
        assert!(matches!(settings.load(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_verified() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_key_pair(dir.path());

        let settings = TlsSettings {
            ca_cert: Some(cert.clone()),
            cert: Some(cert),
            key: Some(key),
            verify: true,
        };
        assert!(settings.load().unwrap().is_some());
    }

    #[test]
    fn test_load_insecure_without_ca() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_key_pair(dir.path());

        let verified = TlsSettings {
            cert: Some(cert.clone()),
            key: Some(key.clone()),
            ..Default::default()
        };
        assert!(matches!(
            verified.load(),
            Err(ConfigError::MissingTlsMaterial(_))
        ));

        let insecure = TlsSettings {
            verify: false,
            ..verified
        };
        assert!(insecure.load().unwrap().is_some());
    }
}

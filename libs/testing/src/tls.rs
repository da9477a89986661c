use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tempfile::TempDir;

/// A throwaway CA plus a server certificate for `localhost`/`127.0.0.1` and
/// a client certificate, with the client side written out as PEM files.
pub struct TlsFixture {
    dir: TempDir,
    ca_cert: PathBuf,
    client_cert: PathBuf,
    client_key: PathBuf,
    ca_der: CertificateDer<'static>,
    server_cert_der: CertificateDer<'static>,
    server_key_der: Vec<u8>,
}

impl TlsFixture {
    pub fn generate() -> io::Result<Self> {
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).map_err(io::Error::other)?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "harbor test ca");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_key = KeyPair::generate().map_err(io::Error::other)?;
        let ca = ca_params.self_signed(&ca_key).map_err(io::Error::other)?;

        let mut server_params =
            CertificateParams::new(vec!["localhost".to_string()]).map_err(io::Error::other)?;
        server_params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server_key = KeyPair::generate().map_err(io::Error::other)?;
        let server = server_params
            .signed_by(&server_key, &ca, &ca_key)
            .map_err(io::Error::other)?;

        let mut client_params =
            CertificateParams::new(vec!["harbor-client".to_string()]).map_err(io::Error::other)?;
        client_params
            .distinguished_name
            .push(DnType::CommonName, "harbor-client");
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client_key = KeyPair::generate().map_err(io::Error::other)?;
        let client = client_params
            .signed_by(&client_key, &ca, &ca_key)
            .map_err(io::Error::other)?;

        let dir = tempfile::tempdir()?;
        let ca_cert = write(dir.path(), "ca.pem", &ca.pem())?;
        let client_cert = write(dir.path(), "cert.pem", &client.pem())?;
        let client_key_path = write(dir.path(), "key.pem", &client_key.serialize_pem())?;

        Ok(Self {
            dir,
            ca_cert,
            client_cert,
            client_key: client_key_path,
            ca_der: ca.der().clone(),
            server_cert_der: server.der().clone(),
            server_key_der: server_key.serialize_der(),
        })
    }

    /// Directory laid out like `DOCKER_CERT_PATH`.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn ca_cert(&self) -> &Path {
        &self.ca_cert
    }

    pub fn client_cert(&self) -> &Path {
        &self.client_cert
    }

    pub fn client_key(&self) -> &Path {
        &self.client_key
    }

    /// Server configuration that requires a client certificate signed by the CA.
    pub fn server_config(&self) -> io::Result<Arc<ServerConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        roots.add(self.ca_der.clone()).map_err(io::Error::other)?;
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                .build()
                .map_err(io::Error::other)?;

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key_der.clone()));
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(io::Error::other)?
            .with_client_cert_verifier(verifier)
            .with_single_cert(vec![self.server_cert_der.clone()], key)
            .map_err(io::Error::other)?;

        Ok(Arc::new(config))
    }
}

fn write(dir: &Path, name: &str, contents: &str) -> io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents)?;
    Ok(path)
}

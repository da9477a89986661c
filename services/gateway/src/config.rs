//! Gateway configuration.
//!
//! Flags with environment fallbacks. TLS paths left unset fall back to the
//! runtime client's own `DOCKER_CERT_PATH` convention.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, ValueEnum};
use harbor_runtime::{TlsSettings, DEFAULT_URL};

/// What a gateway process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Relay, embedded bus and proxy in one process.
    Standalone,
    /// Relay only, publishing to a remote bus.
    Agent,
    /// Bus and proxy only; agents publish into it.
    Server,
}

impl Mode {
    pub fn runs_relay(self) -> bool {
        matches!(self, Mode::Standalone | Mode::Agent)
    }

    pub fn serves_proxy(self) -> bool {
        matches!(self, Mode::Standalone | Mode::Server)
    }
}

/// harbor - relay runtime events onto a bus and proxy the engine API.
#[derive(Debug, Clone, Parser)]
#[command(name = "harbor")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// What this process runs.
    #[arg(value_enum, env = "HARBOR_MODE", default_value_t = Mode::Standalone)]
    pub mode: Mode,

    /// Address to serve HTTP on.
    #[arg(short, long, env = "HARBOR_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Runtime endpoint (`unix://<path>` or `tcp://<host>[:port]`).
    #[arg(long, env = "DOCKER_HOST", default_value = DEFAULT_URL)]
    pub docker_url: String,

    /// Remote bus to publish to. Empty means the embedded bus.
    #[arg(long, env = "HARBOR_BUS_URL")]
    pub bus_url: Option<String>,

    /// CA certificate the runtime's certificate must chain to.
    #[arg(long, env = "HARBOR_TLS_CA_CERT")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Client certificate presented to the runtime.
    #[arg(long, env = "HARBOR_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Key for the client certificate.
    #[arg(long, env = "HARBOR_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Verify the runtime's certificate.
    #[arg(long, env = "HARBOR_TLS_VERIFY", default_value_t = true, action = ArgAction::Set)]
    pub tls_verify: bool,

    /// Enable debug logging.
    #[arg(short, long, env = "HARBOR_DEBUG")]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error) when RUST_LOG is unset.
    #[arg(long, env = "HARBOR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Reject combinations that cannot work before anything starts.
    pub fn validate(&self) -> Result<()> {
        if self.mode == Mode::Agent && self.bus_url().is_none() {
            bail!("agent mode requires --bus-url (or HARBOR_BUS_URL)");
        }
        if self.mode == Mode::Server && self.bus_url().is_some() {
            bail!("server mode hosts the bus itself; --bus-url is not allowed");
        }
        Ok(())
    }

    /// The remote bus, if one is configured.
    pub fn bus_url(&self) -> Option<&str> {
        self.bus_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Whether this process hosts the bus and its `/events` surface.
    pub fn hosts_bus(&self) -> bool {
        self.mode != Mode::Agent && self.bus_url().is_none()
    }

    /// TLS paths from flags, falling back to the process environment.
    pub fn tls_settings(&self) -> TlsSettings {
        self.tls_settings_with(|name| std::env::var(name).ok())
    }

    pub fn tls_settings_with<F>(&self, env: F) -> TlsSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        TlsSettings {
            ca_cert: self.tls_ca_cert.clone(),
            cert: self.tls_cert.clone(),
            key: self.tls_key.clone(),
            verify: self.tls_verify,
        }
        .resolve(env)
    }

    /// Filter directive used when RUST_LOG is unset.
    pub fn log_filter(&self) -> String {
        if self.debug {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("harbor").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        // DOCKER_HOST or HARBOR_* in the test environment would change these.
        if std::env::var_os("DOCKER_HOST").is_none() {
            assert_eq!(config.docker_url, DEFAULT_URL);
        }
        if std::env::var_os("HARBOR_MODE").is_none() {
            assert_eq!(config.mode, Mode::Standalone);
        }
        if std::env::var_os("HARBOR_TLS_VERIFY").is_none() {
            assert!(config.tls_verify);
        }
    }

    #[test]
    fn test_agent_requires_bus_url() {
        let config = parse(&["agent", "--bus-url", ""]);
        assert!(config.validate().is_err());

        let config = parse(&["agent", "--bus-url", "http://bus:8000/events"]);
        config.validate().unwrap();
        assert!(config.mode.runs_relay());
        assert!(!config.hosts_bus());
    }

    #[test]
    fn test_standalone_hosts_bus_without_url() {
        let config = parse(&["standalone", "--bus-url", ""]);
        assert!(config.hosts_bus());
        assert!(config.mode.serves_proxy());

        let config = parse(&["standalone", "--bus-url", "http://bus:8000/events"]);
        assert!(!config.hosts_bus());
    }

    #[test]
    fn test_tls_flags_take_precedence_over_environment() {
        let config = parse(&[
            "--tls-cert",
            "/certs/cert.pem",
            "--tls-key",
            "/certs/key.pem",
            "--tls-verify",
            "false",
        ]);
        let env = |name: &str| match name {
            "DOCKER_CERT_PATH" => Some("/other".to_string()),
            "DOCKER_TLS_VERIFY" => Some("1".to_string()),
            _ => None,
        };

        let tls = config.tls_settings_with(env);
        assert_eq!(tls.cert, Some(PathBuf::from("/certs/cert.pem")));
        assert_eq!(tls.ca_cert, None);
        assert!(!tls.verify);
    }

    #[test]
    fn test_tls_falls_back_to_cert_path() {
        let config = parse(&["--tls-verify", "true"]);
        if config.tls_cert.is_some() {
            return;
        }
        let env = |name: &str| match name {
            "DOCKER_CERT_PATH" => Some("/home/me/.docker".to_string()),
            "DOCKER_TLS_VERIFY" => Some("1".to_string()),
            _ => None,
        };

        let tls = config.tls_settings_with(env);
        assert_eq!(tls.ca_cert, Some(PathBuf::from("/home/me/.docker/ca.pem")));
        assert_eq!(tls.key, Some(PathBuf::from("/home/me/.docker/key.pem")));
    }

    #[test]
    fn test_debug_forces_debug_filter() {
        let config = parse(&["--debug", "--log-level", "warn"]);
        assert_eq!(config.log_filter(), "debug");

        let config = parse(&["--log-level", "warn"]);
        if !config.debug {
            assert_eq!(config.log_filter(), "warn");
        }
    }
}

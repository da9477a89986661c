use harbor_bus::BusError;
use harbor_runtime::{ConfigError, RuntimeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("runtime: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("no service matches name {0:?}")]
    ServiceNotFound(String),

    #[error("bus: {0}")]
    Bus(#[from] BusError),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

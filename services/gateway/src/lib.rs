//! # harbor-gateway
//!
//! The harbor process: a relay that republishes runtime events onto the bus,
//! the bus's HTTP surface, and a reverse proxy to the runtime's engine API.
//!
//! ## Modes
//!
//! - `standalone`: relay, embedded bus and proxy
//! - `agent`: relay publishing to a remote bus
//! - `server`: bus and proxy, fed by agents

pub mod config;
pub mod metrics;
pub mod problem;
pub mod proxy;
pub mod relay;
pub mod server;

use tokio::sync::watch;

pub use config::{Config, Mode};
pub use metrics::{run_uptime_ticker, GatewayStats};
pub use proxy::{Gateway, ProxyError};
pub use relay::{CoordinatorHandle, Normalizer, RecoveryCoordinator, RecoveryState, Relay};
pub use server::{router, ServerParts};

/// Resolve once shutdown has been requested or the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

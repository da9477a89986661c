//! harbor
//!
//! Watches the container runtime's event stream, republishes every event on
//! a topic-addressed bus, and proxies the runtime's engine API over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use harbor_bus::{LocalBus, Publisher, RemotePublisher};
use harbor_gateway::{
    run_uptime_ticker, server, wait_for_shutdown, Config, Gateway, GatewayStats, Relay,
};
use harbor_runtime::{Endpoint, EventSource, RuntimeClient, RuntimeEventSource};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize tracing (prefer RUST_LOG, fallback to --log-level / --debug)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), mode = ?config.mode, "Starting harbor");
    config.validate()?;

    let tls = config
        .tls_settings()
        .load()
        .context("Failed to load TLS material")?;
    let endpoint = Endpoint::parse(&config.docker_url, tls)
        .with_context(|| format!("Invalid runtime endpoint {}", config.docker_url))?;
    info!(
        endpoint = %endpoint.address(),
        scheme = endpoint.http_scheme(),
        "Runtime endpoint configured"
    );

    let stats = GatewayStats::new();
    let source: Arc<dyn EventSource> =
        Arc::new(RuntimeEventSource::new(RuntimeClient::new(endpoint.clone())));

    let bus = config.hosts_bus().then(LocalBus::new);

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = if config.mode.runs_relay() {
        let publisher: Arc<dyn Publisher> = match (&bus, config.bus_url()) {
            (Some(bus), _) => Arc::new(bus.clone()),
            (None, Some(url)) => {
                info!(bus_url = %url, "Publishing to remote bus");
                Arc::new(RemotePublisher::new(url).context("Invalid bus URL")?)
            }
            (None, None) => anyhow::bail!("no bus to publish to"),
        };
        Some(Relay::spawn(
            Arc::clone(&source),
            publisher,
            Arc::clone(&stats),
            shutdown_rx.clone(),
        ))
    } else {
        None
    };

    let ticker_handle = tokio::spawn(run_uptime_ticker(Arc::clone(&stats), shutdown_rx.clone()));

    let gateway = config
        .mode
        .serves_proxy()
        .then(|| Gateway::new(endpoint, Arc::clone(&stats)));

    let app = server::router(server::ServerParts {
        stats,
        source,
        bus,
        gateway,
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!(addr = %config.bind, "Listening for connections");

    // Spawn the server with graceful shutdown
    let mut server_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                wait_for_shutdown(&mut shutdown_rx).await;
                info!("HTTP server shutting down");
            })
            .await
        }
    });

    // Wait for shutdown signal (Ctrl+C)
    let server_done = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            true
        }
    };

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if !server_done && tokio::time::timeout(shutdown_timeout, server_handle).await.is_err() {
        warn!("HTTP server did not shut down in time");
    }

    if let Some(relay) = relay {
        if tokio::time::timeout(shutdown_timeout, relay.join()).await.is_err() {
            warn!("Relay did not shut down in time");
        }
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, ticker_handle).await {
        warn!(error = %e, "Uptime ticker did not shut down in time");
    }

    info!("harbor shutdown complete");
    Ok(())
}

//! Process counters and their text exposition.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::wait_for_shutdown;

/// Counters shared by the relay, the proxy and the uptime ticker.
#[derive(Debug, Default)]
pub struct GatewayStats {
    /// Events handed to the bus successfully.
    pub events_processed: AtomicU64,
    /// Raw events with neither id nor type.
    pub events_discarded: AtomicU64,
    pub publish_failures: AtomicU64,
    /// Sessions opened after the first one.
    pub session_restarts: AtomicU64,
    pub proxy_requests: AtomicU64,
    pub proxy_errors: AtomicU64,
    /// Seconds since start, ticked by [`run_uptime_ticker`].
    pub uptime_seconds: AtomicU64,
}

impl GatewayStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn events_discarded(&self) -> u64 {
        self.events_discarded.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    pub fn session_restarts(&self) -> u64 {
        self.session_restarts.load(Ordering::Relaxed)
    }

    pub fn proxy_requests(&self) -> u64 {
        self.proxy_requests.load(Ordering::Relaxed)
    }

    pub fn proxy_errors(&self) -> u64 {
        self.proxy_errors.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.uptime_seconds.load(Ordering::Relaxed)
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Prometheus text format, counters only.
    pub fn render(&self) -> String {
        let counters = [
            (
                "harbor_totals_events_processed",
                "Total number of events processed",
                self.events_processed(),
            ),
            (
                "harbor_totals_uptime",
                "Number of seconds since the process started",
                self.uptime_seconds(),
            ),
            (
                "harbor_totals_events_discarded",
                "Total number of empty runtime events discarded",
                self.events_discarded(),
            ),
            (
                "harbor_totals_publish_failures",
                "Total number of events the bus refused",
                self.publish_failures(),
            ),
            (
                "harbor_totals_session_restarts",
                "Total number of event stream restarts",
                self.session_restarts(),
            ),
            (
                "harbor_proxy_requests",
                "Total number of proxied engine API requests",
                self.proxy_requests(),
            ),
            (
                "harbor_proxy_errors",
                "Total number of proxied requests that failed upstream",
                self.proxy_errors(),
            ),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }
        out
    }
}

/// Increment the uptime counter once a second until shutdown.
pub async fn run_uptime_ticker(stats: Arc<GatewayStats>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => GatewayStats::incr(&stats.uptime_seconds),
            _ = wait_for_shutdown(&mut shutdown) => {
                debug!("Uptime ticker stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_every_counter() {
        let stats = GatewayStats::new();
        GatewayStats::incr(&stats.events_processed);
        GatewayStats::incr(&stats.events_processed);
        GatewayStats::incr(&stats.session_restarts);

        let text = stats.render();
        assert!(text.contains("# TYPE harbor_totals_events_processed counter\n"));
        assert!(text.contains("\nharbor_totals_events_processed 2\n"));
        assert!(text.contains("\nharbor_totals_uptime 0\n"));
        assert!(text.contains("\nharbor_totals_session_restarts 1\n"));
        assert!(text.contains("\nharbor_proxy_errors 0\n"));
    }

    #[tokio::test]
    async fn test_uptime_ticks_until_shutdown() {
        let stats = GatewayStats::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticker = tokio::spawn(run_uptime_ticker(Arc::clone(&stats), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(2300)).await;
        assert!(stats.uptime_seconds() >= 1);

        shutdown_tx.send(true).unwrap();
        ticker.await.unwrap();
    }
}

//! HTTP surface of the gateway process.
//!
//! | Path | Served when |
//! |---|---|
//! | `/events/*` | the process hosts the bus |
//! | `/proxy/*` | a proxy is configured |
//! | `/metrics`, `/healthz`, `/readyz` | always |

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use harbor_bus::LocalBus;
use harbor_runtime::EventSource;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::metrics::GatewayStats;
use crate::problem::ApiError;
use crate::proxy::{self, Gateway, MOUNT};

#[derive(Clone)]
struct AppState {
    stats: Arc<GatewayStats>,
    source: Arc<dyn EventSource>,
}

/// Routes to assemble into the process router.
pub struct ServerParts {
    pub stats: Arc<GatewayStats>,
    /// Runtime probe backing `/readyz`.
    pub source: Arc<dyn EventSource>,
    /// Mounted at `/events` when present.
    pub bus: Option<LocalBus>,
    /// Mounted at `/proxy` when present.
    pub gateway: Option<Gateway>,
}

pub fn router(parts: ServerParts) -> Router {
    let state = AppState {
        stats: parts.stats,
        source: parts.source,
    };

    let mut app = Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state);

    if let Some(bus) = parts.bus {
        app = app.nest("/events", harbor_bus::http::router(bus));
    }

    if let Some(gateway) = parts.gateway {
        let proxy = Router::new()
            .route(MOUNT, any(proxy::handle))
            .route(&format!("{MOUNT}/{{*path}}"), any(proxy::handle))
            .with_state(gateway);
        app = app.merge(proxy);
    }

    app.layer(TraceLayer::new_for_http())
}

async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.stats.render(),
    )
        .into_response()
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn readyz(State(state): State<AppState>) -> Response {
    match state.source.health_check().await {
        Ok(()) => Json(json!({ "status": "ready" })).into_response(),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            ApiError::service_unavailable("runtime_unavailable", e.to_string())
                .with_instance("/readyz")
                .retryable(e.is_transient())
                .into_response()
        }
    }
}

//! HTTP Server
//!
//! Polling API, downstream WebSocket endpoint and operational routes, served
//! on one port.
//!
//! # Endpoints
//!
//! - `GET /` - Service summary
//! - `GET /candles` - All cached candle series
//! - `GET /prices` - All cached prices
//! - `GET /saldo`, `GET /balance` - Last balance, 404 until one arrives
//! - `GET /status` - Session and subscriber status
//! - `POST /config` - Replace the session token and reconnect
//! - `GET /ws` - Downstream WebSocket
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format

mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::application::ports::UpstreamPort;
use crate::domain::cache::SharedMarketCache;
use crate::domain::market::Symbol;
use crate::domain::selection::SharedSelection;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::upstream::{Credentials, SessionHandle};

/// Reply to an accepted `POST /config`.
pub const RECONFIGURE_ACCEPTED: &str = "SSID recebido. Reconectando...";

// =============================================================================
// Response Types
// =============================================================================

/// `GET /` response.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    /// Service banner.
    pub status: &'static str,
    /// Whether the upstream session is live.
    pub connected: bool,
    /// Number of assets with a candle series.
    pub assets: usize,
    /// Number of assets with a price.
    pub prices: usize,
}

/// `GET /status` response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Always "online" while the server answers.
    pub server: &'static str,
    /// Whether the upstream session is live.
    pub connected: bool,
    /// Upstream connection state.
    pub state: &'static str,
    /// Whether the broker accepted the credentials.
    pub authenticated: bool,
    /// Connected downstream WebSocket clients.
    pub websocket_clients: usize,
    /// Currently selected assets.
    pub monitored_assets: Vec<Symbol>,
    /// Assets with a cached candle series.
    pub available_data: Vec<Symbol>,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: i64,
    /// Start of the current live connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_since: Option<DateTime<Utc>>,
}

/// `POST /config` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigRequest {
    /// New session token.
    #[serde(default)]
    pub ssid: Option<String>,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct GatewayState {
    version: String,
    started_at: DateTime<Utc>,
    cache: SharedMarketCache,
    selection: SharedSelection,
    hub: SharedBroadcastHub,
    session: SessionHandle,
}

impl GatewayState {
    /// Create new server state.
    #[must_use]
    pub fn new(
        version: String,
        cache: SharedMarketCache,
        selection: SharedSelection,
        hub: SharedBroadcastHub,
        session: SessionHandle,
    ) -> Self {
        Self {
            version,
            started_at: Utc::now(),
            cache,
            selection,
            hub,
            session,
        }
    }
}

/// Build the router for all endpoints.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(summary_handler))
        .route("/candles", get(candles_handler))
        .route("/prices", get(prices_handler))
        .route("/saldo", get(balance_handler))
        .route("/balance", get(balance_handler))
        .route("/status", get(status_handler))
        .route("/config", post(config_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Gateway HTTP server.
pub struct HttpServer {
    port: u16,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        let app = router(self.state);

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn summary_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let cache = state.cache.read();
    Json(SummaryResponse {
        status: "Market gateway running",
        connected: state.session.is_live(),
        assets: cache.series_count(),
        prices: cache.price_count(),
    })
}

async fn candles_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.cache.read().all_candles().clone())
}

async fn prices_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.cache.read().prices().clone())
}

async fn balance_handler(State(state): State<Arc<GatewayState>>) -> Response {
    let balance = state.cache.read().balance().cloned();
    balance.map_or_else(
        || {
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Saldo ainda não disponível"})),
            )
                .into_response()
        },
        |data| Json(data).into_response(),
    )
}

async fn status_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(build_status_response(&state))
}

async fn config_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<ConfigRequest>, JsonRejection>,
) -> Response {
    let ssid = match body {
        Ok(Json(ConfigRequest { ssid: Some(ssid) })) => ssid,
        Ok(_) => return bad_request("SSID não fornecido"),
        Err(e) => {
            tracing::debug!(error = %e, "Rejected config body");
            return bad_request("SSID não fornecido");
        }
    };

    let Ok(credentials) = Credentials::session_token(ssid) else {
        return bad_request("SSID não fornecido");
    };

    match state.session.reconfigure(credentials) {
        Ok(()) => {
            tracing::info!("Session token replaced over HTTP, reconnecting");
            Json(json!({"status": RECONFIGURE_ACCEPTED})).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Session rejected reconfiguration");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn build_status_response(state: &GatewayState) -> StatusResponse {
    let session = state.session.state();
    let monitored_assets = state
        .selection
        .read()
        .iter()
        .map(|asset| asset.symbol.clone())
        .collect();

    StatusResponse {
        server: "online",
        connected: session.is_live(),
        state: session.connection_state().as_str(),
        authenticated: session.is_authenticated(),
        websocket_clients: state.hub.subscriber_count(),
        monitored_assets,
        available_data: state.cache.read().all_candles().keys().cloned().collect(),
        version: state.version.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        live_since: session.live_since(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

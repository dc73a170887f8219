//! Market Gateway Binary
//!
//! Starts the broker session, the refresh scheduler and the HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Credentials (optional, public data only without them)
//! - `POCKET_SSID`: Session token
//! - `POCKET_EMAIL` / `POCKET_PASSWORD`: Account login
//!
//! ## Optional
//! - `PORT`: HTTP and WebSocket port (default: 3000)
//! - `UPSTREAM_URL`: Broker WebSocket endpoint
//! - `UPSTREAM_SSID_AUTH`: header | login (default: header)
//! - `ASSET_POLICY`: allow-list | ranked (default: allow-list)
//! - `ASSET_REFRESH_INTERVAL_SECS`: Asset list refresh period (default: 60)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_gateway::application::ports::{ChangePublisher, UpstreamPort};
use market_gateway::infrastructure::telemetry;
use market_gateway::{
    AssetSelector, BroadcastHub, GatewayConfig, GatewayState, HttpServer, MarketCache,
    MarketEventRouter, RefreshScheduler, SessionError, UpstreamSession, dispatch_session_events,
    init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the session event channel.
const SESSION_EVENT_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP)
    let _telemetry_guard = telemetry::init();

    install_panic_hook();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market gateway");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics recorder unavailable, /metrics disabled");
    }

    let config = GatewayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Shared state
    let cache = MarketCache::shared();
    let selection = Arc::new(parking_lot::RwLock::new(Vec::new()));
    let hub = Arc::new(BroadcastHub::new(config.broadcast));

    // Upstream session
    let (event_tx, event_rx) = mpsc::channel(SESSION_EVENT_CAPACITY);
    let (session, handle) = UpstreamSession::new(
        config.upstream.session_config(),
        event_tx,
        shutdown_token.clone(),
    );
    let upstream: Arc<dyn UpstreamPort> = Arc::new(handle.clone());
    let publisher: Arc<dyn ChangePublisher> = Arc::clone(&hub) as Arc<dyn ChangePublisher>;

    let router = MarketEventRouter::new(
        Arc::clone(&cache),
        Arc::clone(&selection),
        AssetSelector::new(config.selection.policy.clone()),
        config.requests.clone(),
        Arc::clone(&upstream),
        publisher,
    );

    // Spawn session event dispatch
    spawn_supervised("dispatch", async move {
        dispatch_session_events(event_rx, &router).await;
    });

    // Spawn upstream session; only exhausted reconnect attempts stop the gateway
    let session_shutdown = shutdown_token.clone();
    spawn_supervised("session", async move {
        match session.run().await {
            Ok(()) => {}
            Err(e @ SessionError::MaxReconnectAttemptsExceeded) => {
                tracing::error!(error = %e, "Upstream session gave up, stopping gateway");
                session_shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Upstream session stopped"),
        }
    });

    // Spawn refresh scheduler
    let refresh = RefreshScheduler::new(
        config.selection.refresh_interval,
        Arc::clone(&upstream),
        shutdown_token.clone(),
    );
    spawn_supervised("refresh", refresh.run());

    // Spawn HTTP server
    let state = Arc::new(GatewayState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        cache,
        selection,
        hub,
        handle,
    ));
    let http_server = HttpServer::new(config.server.port, state, shutdown_token.clone());
    let http_shutdown = shutdown_token.clone();
    let http_task = spawn_supervised("http", async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
            http_shutdown.cancel();
        }
    });

    tracing::info!("Market gateway ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, http_task).await.is_err() {
        tracing::warn!("HTTP server did not stop within the shutdown timeout");
    }

    tracing::info!("Market gateway stopped");
    Ok(())
}

/// Route panic messages through tracing so they reach the log pipeline.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "Panic");
    }));
}

/// Spawn a task whose panic is logged instead of propagated.
fn spawn_supervised<F>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(task);
    tokio::spawn(async move {
        match handle.await {
            Ok(()) => tracing::debug!(task = name, "Task finished"),
            Err(e) if e.is_panic() => tracing::error!(task = name, "Task panicked"),
            Err(_) => tracing::debug!(task = name, "Task cancelled"),
        }
    })
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        port = config.server.port,
        credentials = config.upstream.credentials.mode(),
        policy = config.selection.policy.name(),
        refresh_secs = config.selection.refresh_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(url = %config.upstream.url, "Upstream endpoint");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM, SIGINT or an internal stop, then cancel everything.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal failure, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

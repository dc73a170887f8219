#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Gateway - Broker Stream Fan-out
//!
//! Keeps a single session to the broker's Socket.IO-framed WebSocket feed,
//! caches the latest candles, prices and balance, and republishes them to
//! downstream WebSocket clients and a polling HTTP API.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market data types and state
//!   - `market`: Candles, ticks, asset descriptors, decoded events
//!   - `cache`: Latest candles, prices and balance
//!   - `selection`: Asset selection policies
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream request port, change publisher port
//!   - `services`: Market event routing, asset-list refresh
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Broker session, framing, authentication
//!   - `broadcast`: Downstream subscriber queues
//!   - `http`: HTTP routes and the downstream WebSocket
//!   - `config`: Environment configuration
//!
//! # Data Flow
//!
//! ```text
//!                   ┌──────────┐   ┌────────┐   ┌───────┐
//! Broker WS ───────►│ Session  │──►│ Router │──►│ Cache │
//!     ▲             └──────────┘   └────────┘   └───┬───┘
//!     │  requests        ▲             │            │ changes
//!     └──────────────────┴─────────────┘            ▼
//!                                              ┌─────────┐──► WS client 1
//!                    HTTP API ◄── reads ────── │   Hub   │──► WS client N
//!                                              └─────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{CacheChange, MarketCache, MarketSnapshot, SharedMarketCache};
pub use domain::market::{AssetDescriptor, Candle, MarketEvent, MarketKind, Symbol, Tick};
pub use domain::selection::{AssetSelector, SelectionPolicy, SharedSelection};

// Application services
pub use application::services::{MarketEventRouter, RefreshScheduler, RequestPlan, SubscribeMode};

// Infrastructure config
pub use infrastructure::config::{ConfigError, GatewayConfig};

// HTTP server
pub use infrastructure::http::{GatewayState, HttpServer, HttpServerError};

// Broadcast hub
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastHub, SharedBroadcastHub};

// Upstream session
pub use infrastructure::upstream::{
    Credentials, SessionError, SessionEvent, SessionHandle, UpstreamSession, UpstreamSessionConfig,
    dispatch_session_events,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

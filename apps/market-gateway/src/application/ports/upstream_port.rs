//! Upstream Port (Driven Port)
//!
//! Interface for issuing requests through the broker session.

use crate::domain::market::Symbol;

/// A request the gateway can make of the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamRequest {
    /// Ask for the full asset list.
    AssetsStatus,
    /// Ask for recent candles of one asset.
    Candles {
        /// Asset to query.
        asset: Symbol,
        /// Candle interval in seconds.
        timeframe: u32,
        /// Number of candles.
        count: u32,
    },
    /// Subscribe to live updates of one asset.
    Subscribe {
        /// Asset to subscribe to.
        asset: Symbol,
    },
    /// Subscribe to live ticks of one asset.
    TickSubscribe {
        /// Asset to subscribe to.
        asset: Symbol,
    },
    /// Ask for the account balance.
    BalanceGet,
}

impl UpstreamRequest {
    /// Broker event name for this request.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::AssetsStatus => "assets_status",
            Self::Candles { .. } => "candles",
            Self::Subscribe { .. } => "subscribe",
            Self::TickSubscribe { .. } => "tick-subscribe",
            Self::BalanceGet => "balance_get",
        }
    }
}

/// Port for the single upstream broker session.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamPort: Send + Sync {
    /// Whether the session is currently live.
    fn is_live(&self) -> bool;

    /// Queue a request on the live connection.
    ///
    /// Returns `false` without sending when the session is not live.
    fn send(&self, request: UpstreamRequest) -> bool;
}

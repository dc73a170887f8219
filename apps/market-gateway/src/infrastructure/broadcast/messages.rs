//! Downstream Protocol
//!
//! JSON messages exchanged with downstream WebSocket clients.
//!
//! ## Server → client
//! - `{"type":"snapshot","candles":{...},"prices":{...},"balance":...,"connected":bool}`
//! - `{"type":"candles","asset":"...","data":[...],"price":1.23}`
//! - `{"type":"tick","asset":"...","price":1.23,"timestamp":1700000000000}`
//! - `{"type":"balance","data":...}`
//!
//! ## Client → server
//! - `{"type":"get_candles","asset":"..."}`

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::cache::{CacheChange, MarketSnapshot};
use crate::domain::market::{Candle, Symbol};

/// Message sent to downstream clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full cache state, sent first on every connection.
    Snapshot(MarketSnapshot),
    /// A candle series, pushed on change or sent in reply to `get_candles`.
    Candles {
        /// Asset of the series.
        asset: Symbol,
        /// The series, `null` when the asset has none.
        data: Option<Vec<Candle>>,
        /// Latest price, on pushes only.
        #[serde(skip_serializing_if = "Option::is_none")]
        price: Option<f64>,
    },
    /// A price update.
    Tick {
        /// Asset of the price.
        asset: Symbol,
        /// The new price.
        price: f64,
        /// Broadcast time (unix milliseconds).
        timestamp: i64,
    },
    /// A balance update.
    Balance {
        /// Broker balance payload.
        data: Value,
    },
}

impl ServerMessage {
    /// Build the push message for a cache change.
    #[must_use]
    pub fn from_change(change: &CacheChange, now_millis: i64) -> Self {
        match change {
            CacheChange::Candles {
                asset,
                candles,
                price,
            } => Self::Candles {
                asset: asset.clone(),
                data: Some(candles.clone()),
                price: Some(*price),
            },
            CacheChange::Price { asset, price } => Self::Tick {
                asset: asset.clone(),
                price: *price,
                timestamp: now_millis,
            },
            CacheChange::Balance { data } => Self::Balance { data: data.clone() },
        }
    }

    /// Message kind label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Candles { .. } => "candles",
            Self::Tick { .. } => "tick",
            Self::Balance { .. } => "balance",
        }
    }

    /// Serialize once for sharing across subscriber queues.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_text(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

/// Message received from downstream clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the cached series of one asset.
    GetCandles {
        /// Asset to look up.
        asset: Symbol,
    },
}

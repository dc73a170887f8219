//! Market Cache
//!
//! The single shared aggregate of the gateway: per-asset candle series, the
//! latest observed price per asset, and the last account balance.
//!
//! The cache is pure state. Every successful mutation returns a
//! [`CacheChange`] describing what changed; callers forward it to whatever
//! fans it out. The cache never knows about subscribers.
//!
//! # Semantics
//!
//! - A candle series is only ever replaced, never appended to.
//! - A price is set by a tick or by the close of the last candle in a batch.
//! - Absence of a price means the asset was never observed.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::domain::market::{Candle, Symbol};

/// Cache shared between the event router, the broadcast hub and HTTP handlers.
pub type SharedMarketCache = Arc<RwLock<MarketCache>>;

// =============================================================================
// Change Notifications
// =============================================================================

/// Kind of cache mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A candle series was replaced.
    Candles,
    /// A latest price was overwritten by a tick.
    Price,
    /// The balance was overwritten.
    Balance,
}

impl ChangeKind {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Candles => "candles",
            Self::Price => "price",
            Self::Balance => "balance",
        }
    }
}

/// A successful mutation, carrying the new values.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheChange {
    /// Series replaced for `asset`; `price` is the close of its last candle.
    Candles {
        /// Asset whose series changed.
        asset: Symbol,
        /// The new series.
        candles: Vec<Candle>,
        /// The new latest price.
        price: f64,
    },
    /// Latest price overwritten by a tick.
    Price {
        /// Asset whose price changed.
        asset: Symbol,
        /// The new price.
        price: f64,
    },
    /// Balance overwritten.
    Balance {
        /// The new balance payload.
        data: Value,
    },
}

impl CacheChange {
    /// The kind of this change.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Candles { .. } => ChangeKind::Candles,
            Self::Price { .. } => ChangeKind::Price,
            Self::Balance { .. } => ChangeKind::Balance,
        }
    }

    /// The asset affected, if the change is asset-scoped.
    #[must_use]
    pub fn asset(&self) -> Option<&str> {
        match self {
            Self::Candles { asset, .. } | Self::Price { asset, .. } => Some(asset),
            Self::Balance { .. } => None,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable point-in-time copy of the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    /// All candle series by asset.
    pub candles: BTreeMap<Symbol, Vec<Candle>>,
    /// All latest prices by asset.
    pub prices: BTreeMap<Symbol, f64>,
    /// Last balance, `null` when never received.
    pub balance: Option<Value>,
    /// Whether the upstream session was live when the snapshot was taken.
    pub connected: bool,
}

// =============================================================================
// Cache
// =============================================================================

/// Latest known market state.
#[derive(Debug, Default)]
pub struct MarketCache {
    candles: BTreeMap<Symbol, Vec<Candle>>,
    prices: BTreeMap<Symbol, f64>,
    balance: Option<Value>,
}

impl MarketCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache wrapped for sharing.
    #[must_use]
    pub fn shared() -> SharedMarketCache {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Replace the series of the batch's asset.
    ///
    /// The asset comes from the first candle. Empty batches and batches whose
    /// first candle carries no asset are ignored.
    pub fn apply_candle_batch(&mut self, batch: Vec<Candle>) -> Option<CacheChange> {
        let asset = batch.first()?.asset.clone()?;
        let price = batch.last()?.close;

        self.candles.insert(asset.clone(), batch.clone());
        self.prices.insert(asset.clone(), price);

        Some(CacheChange::Candles {
            asset,
            candles: batch,
            price,
        })
    }

    /// Overwrite the latest price of `symbol`.
    pub fn apply_tick(&mut self, symbol: &str, value: f64) -> CacheChange {
        self.prices.insert(symbol.to_string(), value);
        CacheChange::Price {
            asset: symbol.to_string(),
            price: value,
        }
    }

    /// Overwrite the balance.
    pub fn apply_balance(&mut self, payload: Value) -> CacheChange {
        self.balance = Some(payload.clone());
        CacheChange::Balance { data: payload }
    }

    /// Copy the whole cache together with the supplied liveness flag.
    #[must_use]
    pub fn snapshot(&self, connected: bool) -> MarketSnapshot {
        MarketSnapshot {
            candles: self.candles.clone(),
            prices: self.prices.clone(),
            balance: self.balance.clone(),
            connected,
        }
    }

    /// Series for one asset.
    #[must_use]
    pub fn candles(&self, symbol: &str) -> Option<&[Candle]> {
        self.candles.get(symbol).map(Vec::as_slice)
    }

    /// All series.
    #[must_use]
    pub const fn all_candles(&self) -> &BTreeMap<Symbol, Vec<Candle>> {
        &self.candles
    }

    /// Latest price for one asset.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }

    /// All latest prices.
    #[must_use]
    pub const fn prices(&self) -> &BTreeMap<Symbol, f64> {
        &self.prices
    }

    /// Last balance payload.
    #[must_use]
    pub const fn balance(&self) -> Option<&Value> {
        self.balance.as_ref()
    }

    /// Number of assets with a candle series.
    #[must_use]
    pub fn series_count(&self) -> usize {
        self.candles.len()
    }

    /// Number of assets with a known price.
    #[must_use]
    pub fn price_count(&self) -> usize {
        self.prices.len()
    }

    /// Assets with a known price, in symbol order.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.prices.keys().cloned().collect()
    }
}

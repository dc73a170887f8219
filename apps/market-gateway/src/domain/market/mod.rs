//! Market Data Types
//!
//! Canonical internal representation of the data the gateway caches and
//! relays: candles, asset descriptors, ticks, and the decoded market events
//! that carry them. These types are codec-agnostic; the upstream adapter
//! maps wire payloads into them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A broker asset identifier (e.g. `EURUSD_otc`).
pub type Symbol = String;

/// Suffix the broker uses for over-the-counter variants of an asset.
const OTC_SUFFIX: &str = "_otc";

// =============================================================================
// Candles
// =============================================================================

/// OHLC price bar for one asset and one fixed interval.
///
/// Accepts both long field names and the broker's short aliases
/// (`o`, `h`, `l`, `c`, `v`, `t`/`time`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Asset the candle belongs to, as tagged by the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<Symbol>,
    /// Bar open time (unix seconds).
    #[serde(alias = "time", alias = "t", deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,
    /// Open price.
    #[serde(alias = "o")]
    pub open: f64,
    /// High price.
    #[serde(alias = "h")]
    pub high: f64,
    /// Low price.
    #[serde(alias = "l")]
    pub low: f64,
    /// Close price.
    #[serde(alias = "c")]
    pub close: f64,
    /// Traded volume, when the broker reports it.
    #[serde(default, alias = "v", skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Timestamps arrive as integers or floats depending on the feed.
#[allow(clippy::cast_possible_truncation)]
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    number
        .as_i64()
        .or_else(|| number.as_f64().map(|f| f as i64))
        .ok_or_else(|| serde::de::Error::custom("timestamp is out of range"))
}

// =============================================================================
// Assets
// =============================================================================

/// Market variant of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    /// Over-the-counter, tradable outside exchange hours.
    Otc,
    /// Regular market.
    Standard,
}

impl MarketKind {
    /// Infer the kind from the symbol naming convention.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Self {
        if symbol.ends_with(OTC_SUFFIX) {
            Self::Otc
        } else {
            Self::Standard
        }
    }

    /// Whether this is the OTC variant.
    #[must_use]
    pub const fn is_otc(self) -> bool {
        matches!(self, Self::Otc)
    }
}

/// One tradable asset as listed by the broker.
///
/// Never mutated locally; the whole list is replaced on each refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAssetDescriptor")]
pub struct AssetDescriptor {
    /// Asset identifier.
    pub symbol: Symbol,
    /// Whether the broker currently allows trading it.
    pub enabled: bool,
    /// Payout ratio in `0.0..=1.0`.
    pub payout: f64,
    /// OTC or standard market.
    pub kind: MarketKind,
}

impl AssetDescriptor {
    /// Create a descriptor, inferring the market kind from the symbol.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, enabled: bool, payout: f64) -> Self {
        let symbol = symbol.into();
        let kind = MarketKind::from_symbol(&symbol);
        Self {
            symbol,
            enabled,
            payout,
            kind,
        }
    }
}

#[derive(Deserialize)]
struct RawAssetDescriptor {
    symbol: Symbol,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    payout: f64,
    #[serde(default, alias = "is_otc")]
    otc: Option<bool>,
}

impl From<RawAssetDescriptor> for AssetDescriptor {
    fn from(raw: RawAssetDescriptor) -> Self {
        let kind = match raw.otc {
            Some(true) => MarketKind::Otc,
            Some(false) => MarketKind::Standard,
            None => MarketKind::from_symbol(&raw.symbol),
        };
        // Some feeds report payout as a percentage.
        let payout = if raw.payout > 1.0 {
            raw.payout / 100.0
        } else {
            raw.payout
        };
        Self {
            symbol: raw.symbol,
            enabled: raw.enabled,
            payout,
            kind,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Real-time price update for one asset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tick {
    /// Asset identifier.
    pub asset: Symbol,
    /// Latest price.
    pub value: f64,
}

/// A decoded application event from the upstream session.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// Full list of tradable assets.
    AssetsStatus(Vec<AssetDescriptor>),
    /// A batch of candles for one asset.
    Candles(Vec<Candle>),
    /// A single price update.
    Tick(Tick),
    /// Account balance payload (opaque, broker-defined).
    Balance(Value),
    /// Event name with no handler.
    Unknown {
        /// The unrecognised event name.
        name: String,
    },
}

impl MarketEvent {
    /// Short label used for logging and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AssetsStatus(_) => "assets_status",
            Self::Candles(_) => "candles",
            Self::Tick(_) => "tick",
            Self::Balance(_) => "balance",
            Self::Unknown { .. } => "unknown",
        }
    }
}

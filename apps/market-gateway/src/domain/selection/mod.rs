//! Asset Selection
//!
//! Picks the subset of broker assets the gateway monitors. The output replaces
//! the selected set wholesale on every pass; selection is a pure function of
//! the asset list and the policy, so re-running it on the same list is a no-op.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::market::{AssetDescriptor, MarketKind, Symbol};

/// Currently selected assets, shared with the HTTP layer.
pub type SharedSelection = Arc<RwLock<Vec<AssetDescriptor>>>;

/// Symbols monitored by the default allow-list policy.
pub const DEFAULT_ALLOW_LIST: &[&str] = &[
    "EURUSD_otc",
    "GBPUSD_otc",
    "USDJPY_otc",
    "AUDUSD_otc",
    "USDCAD_otc",
    "BTCUSD_otc",
    "ETHUSD_otc",
];

/// Minimum payout for standard assets under the ranked policy.
pub const DEFAULT_MIN_PAYOUT: f64 = 0.85;

/// How assets are chosen from the broker's list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionPolicy {
    /// Keep enabled assets whose symbol is in the set, in broker order.
    AllowList {
        /// Accepted symbols.
        symbols: Vec<Symbol>,
    },
    /// First `otc_limit` OTC assets, then up to `standard_limit` standard
    /// assets with payout at or above `min_payout`, best payout first.
    /// The enabled flag is ignored.
    Ranked {
        /// Maximum OTC assets.
        otc_limit: usize,
        /// Maximum standard assets.
        standard_limit: usize,
        /// Payout threshold for standard assets.
        min_payout: f64,
    },
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::AllowList {
            symbols: DEFAULT_ALLOW_LIST.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl SelectionPolicy {
    /// Label for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AllowList { .. } => "allow-list",
            Self::Ranked { .. } => "ranked",
        }
    }
}

/// Applies a [`SelectionPolicy`] to asset lists.
#[derive(Debug, Clone, Default)]
pub struct AssetSelector {
    policy: SelectionPolicy,
}

impl AssetSelector {
    /// Create a selector for the given policy.
    #[must_use]
    pub const fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    #[must_use]
    pub const fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Choose the monitored assets from a full broker list.
    #[must_use]
    pub fn select(&self, assets: &[AssetDescriptor]) -> Vec<AssetDescriptor> {
        match &self.policy {
            SelectionPolicy::AllowList { symbols } => {
                let allowed: HashSet<&str> = symbols.iter().map(String::as_str).collect();
                assets
                    .iter()
                    .filter(|a| a.enabled && allowed.contains(a.symbol.as_str()))
                    .cloned()
                    .collect()
            }
            SelectionPolicy::Ranked {
                otc_limit,
                standard_limit,
                min_payout,
            } => {
                let otc = assets
                    .iter()
                    .filter(|a| a.kind == MarketKind::Otc)
                    .take(*otc_limit);

                let mut standard: Vec<&AssetDescriptor> = assets
                    .iter()
                    .filter(|a| a.kind == MarketKind::Standard && a.payout >= *min_payout)
                    .collect();
                // Stable: equal payouts keep broker order.
                standard.sort_by(|a, b| b.payout.total_cmp(&a.payout));

                otc.chain(standard.into_iter().take(*standard_limit))
                    .cloned()
                    .collect()
            }
        }
    }
}

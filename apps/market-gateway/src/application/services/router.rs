//! Market Event Router
//!
//! Dispatches each decoded upstream event to exactly one handler:
//!
//! | Event | Handler |
//! |-------|---------|
//! | `AssetsStatus` | asset selection, then per-asset candle/subscribe requests |
//! | `Candles` | series replacement in the cache |
//! | `Tick` | latest price in the cache |
//! | `Balance` | balance in the cache |
//! | `Unknown` | logged and dropped |
//!
//! Events are handled one at a time in arrival order. Each cache mutation is
//! published while the cache write lock is held, so a subscriber registering
//! concurrently sees either the old snapshot plus the update or the new
//! snapshot, never a gap.
//!
//! Requests triggered by an event are bound to the connection the event
//! arrived on and are skipped once that connection has ended.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ChangePublisher, UpstreamPort, UpstreamRequest};
use crate::domain::cache::SharedMarketCache;
use crate::domain::market::{AssetDescriptor, MarketEvent, Symbol};
use crate::domain::selection::{AssetSelector, SharedSelection};
use crate::infrastructure::metrics;

/// Which live-update request follows each candle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeMode {
    /// Only request candles.
    None,
    /// Send `subscribe`.
    #[default]
    Subscribe,
    /// Send `tick-subscribe`.
    TickSubscribe,
}

impl SubscribeMode {
    fn request(self, asset: &str) -> Option<UpstreamRequest> {
        match self {
            Self::None => None,
            Self::Subscribe => Some(UpstreamRequest::Subscribe {
                asset: asset.to_string(),
            }),
            Self::TickSubscribe => Some(UpstreamRequest::TickSubscribe {
                asset: asset.to_string(),
            }),
        }
    }
}

/// Requests issued for each selected asset.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    /// Candle interval in seconds.
    pub timeframe: u32,
    /// Candles per request.
    pub count: u32,
    /// Live-update request kind.
    pub subscribe: SubscribeMode,
    /// Upper bound of the random delay before each asset's requests.
    /// Zero sends everything immediately and in order.
    pub max_jitter: Duration,
}

impl Default for RequestPlan {
    fn default() -> Self {
        Self {
            timeframe: 60,
            count: 50,
            subscribe: SubscribeMode::Subscribe,
            max_jitter: Duration::from_secs(2),
        }
    }
}

impl RequestPlan {
    /// Requests for one asset, in send order.
    #[must_use]
    pub fn requests_for(&self, asset: &str) -> Vec<UpstreamRequest> {
        let mut requests = vec![UpstreamRequest::Candles {
            asset: asset.to_string(),
            timeframe: self.timeframe,
            count: self.count,
        }];
        requests.extend(self.subscribe.request(asset));
        requests
    }
}

/// Routes decoded market events into the cache and selector.
pub struct MarketEventRouter {
    cache: SharedMarketCache,
    selection: SharedSelection,
    selector: AssetSelector,
    plan: RequestPlan,
    upstream: Arc<dyn UpstreamPort>,
    publisher: Arc<dyn ChangePublisher>,
}

impl MarketEventRouter {
    /// Create a router over the shared cache and selection.
    #[must_use]
    pub fn new(
        cache: SharedMarketCache,
        selection: SharedSelection,
        selector: AssetSelector,
        plan: RequestPlan,
        upstream: Arc<dyn UpstreamPort>,
        publisher: Arc<dyn ChangePublisher>,
    ) -> Self {
        Self {
            cache,
            selection,
            selector,
            plan,
            upstream,
            publisher,
        }
    }

    /// Handle one decoded event received on `connection`.
    pub fn handle(&self, event: MarketEvent, connection: &CancellationToken) {
        match event {
            MarketEvent::AssetsStatus(assets) => self.on_assets(&assets, connection),
            MarketEvent::Candles(batch) => {
                let mut cache = self.cache.write();
                match cache.apply_candle_batch(batch) {
                    Some(change) => self.publisher.publish(&change),
                    None => tracing::debug!("Ignoring empty or untagged candle batch"),
                }
            }
            MarketEvent::Tick(tick) => {
                let mut cache = self.cache.write();
                let change = cache.apply_tick(&tick.asset, tick.value);
                self.publisher.publish(&change);
            }
            MarketEvent::Balance(payload) => {
                let mut cache = self.cache.write();
                let change = cache.apply_balance(payload);
                self.publisher.publish(&change);
            }
            MarketEvent::Unknown { name } => {
                tracing::debug!(event = %name, "Dropping unhandled upstream event");
            }
        }
    }

    fn on_assets(&self, assets: &[AssetDescriptor], connection: &CancellationToken) {
        let selected = self.selector.select(assets);
        tracing::info!(
            available = assets.len(),
            selected = selected.len(),
            policy = self.selector.policy().name(),
            "Asset selection updated"
        );

        let symbols: Vec<Symbol> = selected.iter().map(|a| a.symbol.clone()).collect();
        metrics::set_selected_assets(selected.len());
        *self.selection.write() = selected;

        self.request_assets(symbols, connection);
    }

    fn request_assets(&self, symbols: Vec<Symbol>, connection: &CancellationToken) {
        if connection.is_cancelled() {
            tracing::debug!("Asset list arrived on a closed connection, requests skipped");
            return;
        }

        if self.plan.max_jitter.is_zero() {
            for symbol in &symbols {
                send_all(self.upstream.as_ref(), self.plan.requests_for(symbol));
            }
            return;
        }

        let max_millis = u64::try_from(self.plan.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let mut rng = rand::rng();

        for symbol in symbols {
            let delay = Duration::from_millis(rng.random_range(0..=max_millis));
            let requests = self.plan.requests_for(&symbol);
            let upstream = Arc::clone(&self.upstream);
            tokio::spawn(send_after(delay, connection.clone(), upstream, requests));
        }
    }
}

async fn send_after(
    delay: Duration,
    token: CancellationToken,
    upstream: Arc<dyn UpstreamPort>,
    requests: Vec<UpstreamRequest>,
) {
    tokio::select! {
        biased;
        () = token.cancelled() => {
            tracing::debug!("Connection closed before scheduled asset requests");
        }
        () = tokio::time::sleep(delay) => {
            send_all(upstream.as_ref(), requests);
        }
    }
}

fn send_all(upstream: &dyn UpstreamPort, requests: Vec<UpstreamRequest>) {
    for request in requests {
        let name = request.event_name();
        if !upstream.send(request) {
            tracing::debug!(event = name, "Upstream not live, request skipped");
        }
    }
}

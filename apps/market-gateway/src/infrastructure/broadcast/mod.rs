//! Broadcast Hub
//!
//! Fans cache changes out to downstream subscribers.
//!
//! # Architecture
//!
//! Each subscriber owns a bounded queue of pre-serialized JSON messages,
//! drained by a writer task attached to its socket. Publishing never waits:
//!
//! - a full queue drops that message for that subscriber only
//! - a closed queue marks the subscriber for removal after the pass
//!
//! A new subscriber's first message is the cache snapshot, queued under the
//! cache read lock together with its registration, so no change can fall
//! between the snapshot and the first update it receives.

pub mod messages;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

pub use self::messages::{ClientMessage, ServerMessage};
use crate::application::ports::ChangePublisher;
use crate::domain::cache::{CacheChange, SharedMarketCache};
use crate::infrastructure::metrics;

/// Identifier of one downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for subscriber queues.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Messages buffered per subscriber before drops start.
    pub subscriber_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 256,
        }
    }
}

/// A registered subscriber's end of its queue.
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber identifier, for [`BroadcastHub::unsubscribe`].
    pub id: SubscriberId,
    /// Queue sender, for replies to this subscriber only.
    pub sender: mpsc::Sender<Arc<str>>,
    /// Queue receiver, drained by the socket writer.
    pub receiver: mpsc::Receiver<Arc<str>>,
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Set of downstream subscribers.
///
/// # Example
///
/// ```rust
/// use market_gateway::domain::cache::MarketCache;
/// use market_gateway::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let cache = MarketCache::shared();
/// let hub = BroadcastHub::new(BroadcastConfig::default());
///
/// let mut subscription = hub.subscribe(&cache, false);
/// let snapshot = subscription.receiver.try_recv().unwrap();
/// assert!(snapshot.contains("\"type\":\"snapshot\""));
///
/// assert!(hub.unsubscribe(subscription.id));
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    config: BroadcastConfig,
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Arc<str>>>>,
}

impl BroadcastHub {
    /// Create a hub.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Register a subscriber and queue its snapshot.
    ///
    /// `connected` is the upstream liveness to report in the snapshot.
    #[must_use]
    pub fn subscribe(&self, cache: &SharedMarketCache, connected: bool) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.config.subscriber_capacity.max(1));
        let id = SubscriberId::new();

        let cache = cache.read();
        match ServerMessage::Snapshot(cache.snapshot(connected)).to_text() {
            Ok(text) => {
                // A fresh queue has room for the snapshot.
                let _ = sender.try_send(text);
                metrics::record_downstream_message("snapshot");
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize snapshot"),
        }
        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, sender.clone());
            subscribers.len()
        };
        drop(cache);

        metrics::set_subscribers(count);
        tracing::info!(subscriber = %id, subscribers = count, "Downstream subscriber added");

        Subscription {
            id,
            sender,
            receiver,
        }
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            (subscribers.remove(&id).is_some(), subscribers.len())
        };
        if removed {
            metrics::set_subscribers(count);
            tracing::info!(subscriber = %id, subscribers = count, "Downstream subscriber removed");
        }
        removed
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Offer one message to every subscriber without waiting.
    ///
    /// Returns the number of subscribers it was queued for.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind(), "Failed to serialize update");
                return 0;
            }
        };

        let targets: Vec<(SubscriberId, mpsc::Sender<Arc<str>>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(Arc::clone(&text)) {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_downstream_message(message.kind());
                }
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(subscriber = %id, kind = message.kind(), "Subscriber queue full, dropping update");
                    metrics::record_downstream_dropped(message.kind());
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let count = {
                let mut subscribers = self.subscribers.write();
                for id in &closed {
                    subscribers.remove(id);
                }
                subscribers.len()
            };
            metrics::set_subscribers(count);
            tracing::debug!(removed = closed.len(), "Pruned closed subscribers");
        }

        delivered
    }
}

impl ChangePublisher for BroadcastHub {
    fn publish(&self, change: &CacheChange) {
        metrics::record_cache_change(change.kind().as_str());
        let message = ServerMessage::from_change(change, Utc::now().timestamp_millis());
        self.broadcast(&message);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::domain::cache::MarketCache;

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn snapshot_is_first_message() {
        let cache = MarketCache::shared();
        cache.write().apply_tick("EURUSD_otc", 1.08);
        let hub = BroadcastHub::with_defaults();

        let mut sub = hub.subscribe(&cache, true);

        let first = parse(&sub.receiver.try_recv().unwrap());
        assert_eq!(first["type"], "snapshot");
        assert_eq!(first["prices"]["EURUSD_otc"], 1.08);
        assert_eq!(first["connected"], true);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let cache = MarketCache::shared();
        let hub = BroadcastHub::with_defaults();
        let mut a = hub.subscribe(&cache, false);
        let mut b = hub.subscribe(&cache, false);
        a.receiver.try_recv().unwrap();
        b.receiver.try_recv().unwrap();

        hub.publish(&CacheChange::Balance {
            data: json!({"balance": 5}),
        });

        for sub in [&mut a, &mut b] {
            let message = parse(&sub.receiver.try_recv().unwrap());
            assert_eq!(message, json!({"type": "balance", "data": {"balance": 5}}));
        }
    }

    #[test]
    fn full_queue_drops_only_for_that_subscriber() {
        let cache = MarketCache::shared();
        let hub = BroadcastHub::new(BroadcastConfig {
            subscriber_capacity: 2,
        });
        let mut slow = hub.subscribe(&cache, false);
        let mut fast = hub.subscribe(&cache, false);
        fast.receiver.try_recv().unwrap();

        let change = CacheChange::Price {
            asset: "A".into(),
            price: 1.0,
        };
        // slow: snapshot + 1 update fills the queue; the rest are dropped.
        for _ in 0..3 {
            hub.publish(&change);
            fast.receiver.try_recv().unwrap();
        }

        assert_eq!(parse(&slow.receiver.try_recv().unwrap())["type"], "snapshot");
        assert_eq!(parse(&slow.receiver.try_recv().unwrap())["type"], "tick");
        assert!(slow.receiver.try_recv().is_err());
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn closed_subscribers_are_pruned_lazily() {
        let cache = MarketCache::shared();
        let hub = BroadcastHub::with_defaults();
        let Subscription { receiver, .. } = hub.subscribe(&cache, false);
        let mut alive = hub.subscribe(&cache, false);
        drop(receiver);

        assert_eq!(hub.subscriber_count(), 2);
        let delivered = hub.broadcast(&ServerMessage::Balance { data: json!(1) });

        assert_eq!(delivered, 1);
        assert_eq!(hub.subscriber_count(), 1);
        alive.receiver.try_recv().unwrap();
        alive.receiver.try_recv().unwrap();
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let cache = MarketCache::shared();
        let hub = BroadcastHub::with_defaults();
        let sub = hub.subscribe(&cache, false);

        assert!(hub.unsubscribe(sub.id));
        assert!(!hub.unsubscribe(sub.id));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn late_subscriber_matches_early_subscriber_state() {
        let cache = MarketCache::shared();
        let hub = BroadcastHub::with_defaults();
        let mut early = hub.subscribe(&cache, true);

        // Apply and publish under the write lock, as the router does.
        for (asset, price) in [("A", 1.0), ("B", 2.0), ("A", 3.0)] {
            let mut guard = cache.write();
            let change = guard.apply_tick(asset, price);
            hub.publish(&change);
        }
        let mut late = hub.subscribe(&cache, true);

        let mut early_prices = serde_json::Map::new();
        while let Ok(text) = early.receiver.try_recv() {
            let message = parse(&text);
            if message["type"] == "tick" {
                early_prices.insert(
                    message["asset"].as_str().unwrap().to_string(),
                    message["price"].clone(),
                );
            }
        }
        let snapshot = parse(&late.receiver.try_recv().unwrap());

        assert_eq!(Value::Object(early_prices), snapshot["prices"]);
    }
}

//! Change Publisher Port (Driven Port)
//!
//! Interface for fanning cache changes out to downstream subscribers.

use crate::domain::cache::CacheChange;

/// Port for publishing cache changes.
///
/// Implementations must not block: the router calls this inline between
/// two upstream events.
pub trait ChangePublisher: Send + Sync {
    /// Offer one change to every current subscriber.
    fn publish(&self, change: &CacheChange);
}

/// Publisher that discards every change.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct NoOpChangePublisher;

#[cfg(test)]
impl ChangePublisher for NoOpChangePublisher {
    fn publish(&self, _change: &CacheChange) {}
}

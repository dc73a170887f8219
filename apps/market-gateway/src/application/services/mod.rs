//! Application Services
//!
//! - `MarketEventRouter`: dispatches decoded upstream events into the domain
//! - `RefreshScheduler`: periodically re-requests the asset list

mod refresh;
mod router;

pub use refresh::RefreshScheduler;
pub use router::{MarketEventRouter, RequestPlan, SubscribeMode};

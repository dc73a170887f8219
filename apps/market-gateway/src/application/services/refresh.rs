//! Refresh Scheduler
//!
//! Re-issues `assets_status` on a fixed period while the session is live, so
//! the selected set follows the broker's availability changes.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::ports::{UpstreamPort, UpstreamRequest};

/// Periodic asset-list refresh.
pub struct RefreshScheduler {
    period: Duration,
    upstream: Arc<dyn UpstreamPort>,
    cancel: CancellationToken,
}

impl RefreshScheduler {
    /// Create a scheduler firing every `period`.
    #[must_use]
    pub fn new(period: Duration, upstream: Arc<dyn UpstreamPort>, cancel: CancellationToken) -> Self {
        Self {
            period,
            upstream,
            cancel,
        }
    }

    /// Run until cancelled. The first refresh fires one period after start;
    /// the session requests the list itself on entering the live state.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.period;
        let mut interval = tokio::time::interval_at(start, self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Refresh scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.upstream.is_live() {
                        tracing::debug!("Refreshing asset list");
                        self.upstream.send(UpstreamRequest::AssetsStatus);
                    }
                }
            }
        }
    }
}

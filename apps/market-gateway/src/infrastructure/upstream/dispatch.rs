//! Session event dispatch.
//!
//! Drains the session's event channel: market events go to the router,
//! lifecycle events are logged. A panic while handling one event is logged
//! and the loop moves on to the next, so the channel stays open for the
//! session's lifetime.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::mpsc;

use crate::application::services::MarketEventRouter;
use crate::infrastructure::upstream::SessionEvent;

/// Handle events from the upstream session until its channel closes.
pub async fn dispatch_session_events(
    mut rx: mpsc::Receiver<SessionEvent>,
    router: &MarketEventRouter,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Live { authenticated } => {
                tracing::info!(authenticated, "Upstream session live");
            }
            SessionEvent::Disconnected => {
                tracing::warn!("Upstream session disconnected");
            }
            SessionEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Upstream session reconnecting");
            }
            SessionEvent::Market { event, connection } => {
                let label = event.label();
                tracing::trace!(event = label, "Market event");
                // Shared state sits behind parking_lot locks, which do not poison.
                if catch_unwind(AssertUnwindSafe(|| router.handle(event, &connection))).is_err() {
                    tracing::error!(event = label, "Market event handler panicked, event dropped");
                }
            }
        }
    }
    tracing::debug!("Session event channel closed");
}

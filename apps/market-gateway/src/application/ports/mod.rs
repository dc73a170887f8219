//! Port Interfaces
//!
//! Contracts between the application services and the infrastructure
//! adapters, following the hexagonal layout.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamPort`: sends requests through the single broker session
//! - `ChangePublisher`: fans cache changes out to downstream subscribers

mod change_publisher_port;
mod upstream_port;

pub use change_publisher_port::ChangePublisher;
#[cfg(test)]
pub use change_publisher_port::NoOpChangePublisher;
#[cfg(test)]
pub use upstream_port::MockUpstreamPort;
pub use upstream_port::{UpstreamPort, UpstreamRequest};

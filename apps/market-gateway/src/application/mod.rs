//! Application Layer - Use cases and port definitions.
//!
//! Routes decoded upstream events into the domain and keeps the asset list
//! fresh. Talks to infrastructure only through the ports defined here.

/// Port interfaces for the upstream session and change fan-out.
pub mod ports;

/// Event routing and periodic refresh.
pub mod services;

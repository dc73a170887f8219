//! Domain Layer
//!
//! Market data types, the market cache and asset selection. No I/O.

pub mod cache;
pub mod market;
pub mod selection;

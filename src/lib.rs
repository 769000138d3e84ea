//! Offline-first caching and sync layer for an embeddable comment widget.
//!
//! Reads flow through a [`strategy::StrategyRouter`] that picks a fetch
//! strategy per path and serves from named cache partitions, the network, or
//! both. Writes go straight to the remote API and fall back to a durable
//! [`offline::OfflineQueue`] when the network is unreachable; a
//! [`offline::BackgroundSync`] pass replays the queue later.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod offline;
pub mod storage;
pub mod strategy;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use app::App;
pub use config::Config;
pub use error::{ApiError, TransportError};

//! Client-side caching primitives.
//!
//! This module provides the in-memory building blocks shared by the strategy
//! router and the data access layer:
//! - A bounded TTL cache with lazy expiry and insertion-order eviction
//! - Substring invalidation so one write clears every viewer's variant of a read
//! - Injectable clocks so expiry can be driven deterministically

mod clock;
pub mod keys;
mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ttl::{CacheEntry, CacheStats, TtlCache};

//! Path-based fetch strategies over named cache partitions.
//!
//! Every request is routed by a static, ordered prefix table to one of four
//! strategies. Reads may be served from the `static`, `api` or `dynamic`
//! partition; writes always go to the network.

mod router;
mod table;

pub use router::{Revalidation, Routed, StrategyRouter};
pub use table::{Partition, Strategy, StrategyRule, StrategyTable};

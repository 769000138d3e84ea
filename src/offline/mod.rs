//! Offline write path: durable queue, background replay, and reconciliation
//! of optimistic local state.

mod models;
mod queue;
mod reconcile;
mod sync;
mod worker;

pub use models::{Invalidation, PendingWrite, WriteKind};
pub use queue::{OfflineQueue, PendingIter};
pub use reconcile::LocalView;
pub use sync::{BackgroundSync, ReplayOutcome, SyncReport, SyncState, SyncTrigger};
pub use worker::{spawn_connectivity_probe, SyncWorker};

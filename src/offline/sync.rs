//! Replays the offline queue against the remote API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::models::PendingWrite;
use super::queue::OfflineQueue;
use crate::cache::TtlCache;
use crate::error::ApiError;
use crate::strategy::StrategyRouter;
use crate::transport::HttpResponse;

/// What started a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
  /// The platform reports the API is reachable again
  ConnectivityRestored,
  /// Someone asked to flush now
  FlushNow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Syncing,
}

/// Result of replaying one pending write.
#[derive(Debug, Clone)]
pub enum ReplayOutcome {
  /// Server accepted the write; it has been removed from the queue
  Confirmed {
    write: PendingWrite,
    response: HttpResponse,
  },
  /// Server refused the write (4xx); dropped, never retried
  Rejected {
    write: PendingWrite,
    status: u16,
    message: String,
  },
  /// Transient failure; left queued for the next pass
  Deferred { write: PendingWrite, reason: String },
}

impl ReplayOutcome {
  pub fn write(&self) -> &PendingWrite {
    match self {
      ReplayOutcome::Confirmed { write, .. }
      | ReplayOutcome::Rejected { write, .. }
      | ReplayOutcome::Deferred { write, .. } => write,
    }
  }
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
  pub outcomes: Vec<ReplayOutcome>,
  /// Another pass was already running, so this one did nothing
  pub skipped: bool,
}

impl SyncReport {
  fn skipped() -> Self {
    Self {
      outcomes: Vec::new(),
      skipped: true,
    }
  }

  pub fn confirmed(&self) -> usize {
    self.count(|o| matches!(o, ReplayOutcome::Confirmed { .. }))
  }

  pub fn rejected(&self) -> usize {
    self.count(|o| matches!(o, ReplayOutcome::Rejected { .. }))
  }

  pub fn deferred(&self) -> usize {
    self.count(|o| matches!(o, ReplayOutcome::Deferred { .. }))
  }

  fn count(&self, pred: impl Fn(&ReplayOutcome) -> bool) -> usize {
    self.outcomes.iter().filter(|o| pred(o)).count()
  }
}

/// Resets the in-progress flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Drains the [`OfflineQueue`] through network-only requests.
///
/// Only one pass runs at a time; a trigger arriving mid-pass is skipped rather
/// than queued, since the running pass already covers its snapshot. There is
/// no backoff: failed entries wait for the next trigger.
pub struct BackgroundSync {
  queue: Arc<OfflineQueue>,
  router: Arc<StrategyRouter>,
  cache: Arc<TtlCache<serde_json::Value>>,
  in_progress: AtomicBool,
}

impl BackgroundSync {
  pub fn new(
    queue: Arc<OfflineQueue>,
    router: Arc<StrategyRouter>,
    cache: Arc<TtlCache<serde_json::Value>>,
  ) -> Self {
    Self {
      queue,
      router,
      cache,
      in_progress: AtomicBool::new(false),
    }
  }

  pub fn state(&self) -> SyncState {
    if self.in_progress.load(Ordering::Acquire) {
      SyncState::Syncing
    } else {
      SyncState::Idle
    }
  }

  /// Run one pass over the writes pending at its start.
  pub async fn trigger(&self, trigger: SyncTrigger) -> SyncReport {
    if self
      .in_progress
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!(?trigger, "sync already in progress");
      return SyncReport::skipped();
    }
    let _guard = PassGuard(&self.in_progress);

    let pending = match self.queue.list_pending() {
      Ok(pending) => pending,
      Err(e) => {
        warn!(error = %e, "could not read offline queue");
        return SyncReport::default();
      }
    };

    let mut report = SyncReport::default();
    for write in pending {
      match self.queue.claim(&write.id) {
        Ok(true) => {}
        Ok(false) => {
          debug!(id = %write.id, "write cancelled or already in flight");
          continue;
        }
        Err(e) => {
          warn!(id = %write.id, error = %e, "could not claim pending write");
          continue;
        }
      }
      let id = write.id.clone();
      let outcome = self.replay(write).await;
      self.queue.release(&id);
      report.outcomes.push(outcome);
    }

    info!(
      ?trigger,
      confirmed = report.confirmed(),
      rejected = report.rejected(),
      deferred = report.deferred(),
      "sync pass finished"
    );
    report
  }

  async fn replay(&self, write: PendingWrite) -> ReplayOutcome {
    let routed = self.router.fetch(write.request()).await;

    match ApiError::check(routed.response) {
      Ok(response) => {
        self.forget(&write);
        write.invalidation().apply(&self.cache, &self.router);
        debug!(id = %write.id, kind = %write.kind, "write synced");
        ReplayOutcome::Confirmed { write, response }
      }
      Err(ApiError::Rejected { status, message }) => {
        warn!(id = %write.id, kind = %write.kind, status, %message, "server rejected queued write");
        self.forget(&write);
        ReplayOutcome::Rejected {
          write,
          status,
          message,
        }
      }
      Err(e) => {
        debug!(id = %write.id, error = %e, "write still pending");
        ReplayOutcome::Deferred {
          write,
          reason: e.to_string(),
        }
      }
    }
  }

  fn forget(&self, write: &PendingWrite) {
    // A failed delete means a duplicate replay later; the idempotency key
    // lets the server drop it.
    if let Err(e) = self.queue.remove(&write.id) {
      warn!(id = %write.id, error = %e, "could not remove synced write");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PartitionTtls;
  use crate::offline::WriteKind;
  use crate::storage::MemoryStore;
  use crate::strategy::StrategyTable;
  use crate::testing::FakeTransport;
  use crate::transport::Method;
  use serde_json::json;
  use std::time::Duration;

  struct Fixture {
    transport: Arc<FakeTransport>,
    queue: Arc<OfflineQueue>,
    cache: Arc<TtlCache<serde_json::Value>>,
    sync: Arc<BackgroundSync>,
  }

  fn fixture() -> Fixture {
    let transport = Arc::new(FakeTransport::new());
    let router = Arc::new(StrategyRouter::new(
      transport.clone(),
      StrategyTable::default(),
      100,
      PartitionTtls::default(),
      Duration::from_secs(10),
    ));
    let queue = Arc::new(OfflineQueue::new(Arc::new(MemoryStore::new())));
    let cache = Arc::new(TtlCache::new("client", 100, chrono::Duration::minutes(5)));
    let sync = Arc::new(BackgroundSync::new(queue.clone(), router, cache.clone()));
    Fixture {
      transport,
      queue,
      cache,
      sync,
    }
  }

  fn create_payload(topic: &str) -> serde_json::Value {
    json!({"topicId": topic, "userId": "u1", "content": "hi"})
  }

  #[tokio::test]
  async fn test_confirmed_writes_are_removed_and_invalidate() {
    let f = fixture();
    f.transport
      .respond_json(Method::Post, "/api/comments/create", 200, json!({"comment": {}}));
    f.cache.insert("comments_t1_u1", json!([]));
    f.cache.insert("comments_t2_u1", json!([]));
    f.queue
      .enqueue(WriteKind::CreateComment, create_payload("t1"))
      .unwrap();

    let report = f.sync.trigger(SyncTrigger::FlushNow).await;

    assert_eq!(report.confirmed(), 1);
    assert!(f.queue.is_empty().unwrap());
    assert!(f.cache.get("comments_t1_u1").is_none());
    assert!(f.cache.get("comments_t2_u1").is_some());
    assert_eq!(f.sync.state(), SyncState::Idle);
  }

  #[tokio::test]
  async fn test_failures_stay_queued_for_next_trigger() {
    let f = fixture();
    f.transport.set_online(false);
    let write = f
      .queue
      .enqueue(WriteKind::CreateComment, create_payload("t1"))
      .unwrap();

    let report = f.sync.trigger(SyncTrigger::ConnectivityRestored).await;
    assert_eq!(report.deferred(), 1);
    assert_eq!(f.queue.get(&write.id).unwrap(), Some(write));

    f.transport.set_online(true);
    f.transport
      .respond_json(Method::Post, "/api/comments/create", 201, json!({"comment": {}}));
    let report = f.sync.trigger(SyncTrigger::ConnectivityRestored).await;
    assert_eq!(report.confirmed(), 1);
    assert!(f.queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_server_errors_are_deferred_rejections_dropped() {
    let f = fixture();
    f.transport
      .respond_json(Method::Post, "/api/comments/create", 400, json!({"error": "Missing required fields"}));
    f.transport.respond(Method::Post, "/api/comments/reaction", 500, "boom");
    f.queue
      .enqueue(WriteKind::CreateComment, create_payload("t1"))
      .unwrap();
    let reaction = f
      .queue
      .enqueue(WriteKind::ToggleReaction, json!({"commentId": "c1"}))
      .unwrap();

    let report = f.sync.trigger(SyncTrigger::FlushNow).await;

    assert_eq!(report.rejected(), 1);
    assert_eq!(report.deferred(), 1);
    let remaining: Vec<_> = f.queue.list_pending().unwrap().collect();
    assert_eq!(remaining, vec![reaction]);
  }

  #[tokio::test]
  async fn test_replay_sends_idempotency_key() {
    let f = fixture();
    f.transport
      .respond_json(Method::Post, "/api/comments/reaction", 200, json!({"success": true}));
    let write = f
      .queue
      .enqueue(WriteKind::ToggleReaction, json!({"commentId": "c1"}))
      .unwrap();

    f.sync.trigger(SyncTrigger::FlushNow).await;

    let calls = f.transport.calls();
    assert_eq!(calls[0].idempotency_key.as_deref(), Some(write.id.as_str()));
  }

  #[tokio::test]
  async fn test_concurrent_trigger_is_skipped() {
    let f = fixture();
    f.transport
      .respond_json(Method::Post, "/api/comments/create", 200, json!({"comment": {}}));
    f.transport.set_delay(Some(Duration::from_millis(50)));
    f.queue
      .enqueue(WriteKind::CreateComment, create_payload("t1"))
      .unwrap();

    let (first, second) = tokio::join!(
      f.sync.trigger(SyncTrigger::ConnectivityRestored),
      f.sync.trigger(SyncTrigger::FlushNow)
    );

    assert!(!first.skipped);
    assert!(second.skipped);
    assert_eq!(f.transport.call_count("/api/comments/create"), 1);
    assert_eq!(first.confirmed(), 1);
  }
}

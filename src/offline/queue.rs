//! Durable queue of writes waiting for the network.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::{PendingWrite, WriteKind};
use crate::cache::{Clock, SystemClock};
use crate::storage::KeyValueStore;

const KEY_PREFIX: &str = "pending_write:";

fn storage_key(id: &str) -> String {
  format!("{}{}", KEY_PREFIX, id)
}

/// Queue of [`PendingWrite`]s persisted through a [`KeyValueStore`].
///
/// Ids are time-ordered, so listing keys yields writes in enqueue order.
/// Durability is at most once: if the store rejects a write, `enqueue`
/// reports the error and the record is gone.
///
/// A write being replayed is claimed; a claimed write can be removed by the
/// sync pass that holds it but never cancelled.
pub struct OfflineQueue {
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  in_flight: Mutex<HashSet<String>>,
}

impl OfflineQueue {
  pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
      in_flight: Mutex::new(HashSet::new()),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// A fresh, time-ordered pending-write id.
  pub fn new_id() -> String {
    Uuid::now_v7().to_string()
  }

  /// Record a write under a new id.
  pub fn enqueue(&self, kind: WriteKind, payload: serde_json::Value) -> Result<PendingWrite> {
    self.enqueue_with_id(Self::new_id(), kind, payload, true)
  }

  /// Record a write under an id the caller already used as idempotency key.
  pub fn enqueue_with_id(
    &self,
    id: String,
    kind: WriteKind,
    payload: serde_json::Value,
    offline: bool,
  ) -> Result<PendingWrite> {
    let write = PendingWrite {
      id,
      kind,
      payload,
      enqueued_at: self.clock.now(),
      offline,
    };

    let record =
      serde_json::to_string(&write).map_err(|e| eyre!("Failed to serialize pending write: {}", e))?;
    self.store.set_item(&storage_key(&write.id), &record)?;

    debug!(id = %write.id, kind = %write.kind, "queued write");
    Ok(write)
  }

  /// Lazily iterate the writes pending right now.
  ///
  /// The key set is snapshotted up front; records are loaded one at a time,
  /// and one removed mid-iteration is skipped. Call again to restart.
  pub fn list_pending(&self) -> Result<PendingIter> {
    let keys = self.store.list_keys(KEY_PREFIX)?;
    Ok(PendingIter {
      store: Arc::clone(&self.store),
      keys: keys.into_iter(),
    })
  }

  pub fn get(&self, id: &str) -> Result<Option<PendingWrite>> {
    self
      .store
      .get_item(&storage_key(id))?
      .map(|record| {
        serde_json::from_str(&record).map_err(|e| eyre!("Corrupt pending write {}: {}", id, e))
      })
      .transpose()
  }

  /// Forget a write, normally after the server confirmed it.
  pub fn remove(&self, id: &str) -> Result<bool> {
    let removed = self.store.remove_item(&storage_key(id))?;
    if removed {
      debug!(%id, "removed pending write");
    }
    Ok(removed)
  }

  /// Mark a write as being sent. Returns false if it is gone or already
  /// claimed.
  pub fn claim(&self, id: &str) -> Result<bool> {
    let mut in_flight = self
      .in_flight
      .lock()
      .map_err(|_| eyre!("Offline queue claim set poisoned"))?;
    if in_flight.contains(id) || self.store.get_item(&storage_key(id))?.is_none() {
      return Ok(false);
    }
    in_flight.insert(id.to_string());
    Ok(true)
  }

  pub fn release(&self, id: &str) {
    if let Ok(mut in_flight) = self.in_flight.lock() {
      in_flight.remove(id);
    }
  }

  pub fn is_claimed(&self, id: &str) -> bool {
    self
      .in_flight
      .lock()
      .map(|in_flight| in_flight.contains(id))
      .unwrap_or(false)
  }

  /// Withdraw a write that has not been sent. Returns false if it is gone or
  /// a sync pass is sending it.
  pub fn cancel(&self, id: &str) -> Result<bool> {
    let in_flight = self
      .in_flight
      .lock()
      .map_err(|_| eyre!("Offline queue claim set poisoned"))?;
    if in_flight.contains(id) {
      return Ok(false);
    }
    self.remove(id)
  }

  /// Queued toggles for one (comment, user) pair, oldest first.
  pub fn pending_reactions(&self, comment_id: &str, user_id: &str) -> Result<Vec<PendingWrite>> {
    Ok(
      self
        .list_pending()?
        .filter(|write| {
          write
            .as_reaction()
            .is_some_and(|r| r.comment_id == comment_id && r.user_id == user_id)
        })
        .collect(),
    )
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.store.list_keys(KEY_PREFIX)?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

/// Iterator returned by [`OfflineQueue::list_pending`].
pub struct PendingIter {
  store: Arc<dyn KeyValueStore>,
  keys: std::vec::IntoIter<String>,
}

impl Iterator for PendingIter {
  type Item = PendingWrite;

  fn next(&mut self) -> Option<PendingWrite> {
    for key in self.keys.by_ref() {
      match self.store.get_item(&key) {
        Ok(Some(record)) => match serde_json::from_str(&record) {
          Ok(write) => return Some(write),
          Err(e) => warn!(%key, error = %e, "skipping corrupt pending write"),
        },
        Ok(None) => continue,
        Err(e) => warn!(%key, error = %e, "failed to load pending write"),
      }
    }
    None
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.keys.len()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::{MemoryStore, SqliteStore};
  use serde_json::json;

  fn queue() -> (OfflineQueue, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (OfflineQueue::new(store.clone()), store)
  }

  #[test]
  fn test_enqueue_list_remove_round_trip() {
    let (queue, _store) = queue();
    let write = queue
      .enqueue(WriteKind::CreateComment, json!({"topicId": "t1"}))
      .unwrap();

    let pending: Vec<_> = queue.list_pending().unwrap().collect();
    assert_eq!(pending, vec![write.clone()]);

    assert!(queue.remove(&write.id).unwrap());
    assert_eq!(queue.list_pending().unwrap().count(), 0);
    assert!(queue.is_empty().unwrap());
  }

  #[test]
  fn test_lists_in_enqueue_order() {
    let (queue, _store) = queue();
    let ids: Vec<String> = (0..5)
      .map(|i| {
        queue
          .enqueue(WriteKind::ToggleReaction, json!({ "n": i }))
          .unwrap()
          .id
      })
      .collect();

    let listed: Vec<String> = queue.list_pending().unwrap().map(|w| w.id).collect();
    assert_eq!(listed, ids);
  }

  #[test]
  fn test_listing_is_restartable_and_skips_removed() {
    let (queue, _store) = queue();
    let a = queue.enqueue(WriteKind::CreateComment, json!({})).unwrap();
    let b = queue.enqueue(WriteKind::CreateComment, json!({})).unwrap();

    let mut iter = queue.list_pending().unwrap();
    assert_eq!(iter.next().map(|w| w.id), Some(a.id.clone()));
    queue.remove(&b.id).unwrap();
    assert_eq!(iter.next(), None);

    // A new listing starts over
    assert_eq!(queue.list_pending().unwrap().count(), 1);
  }

  #[test]
  fn test_corrupt_record_is_skipped() {
    let (queue, store) = queue();
    store.set_item("pending_write:0-bad", "not json").unwrap();
    let good = queue.enqueue(WriteKind::CreateComment, json!({})).unwrap();

    let listed: Vec<_> = queue.list_pending().unwrap().collect();
    assert_eq!(listed, vec![good]);
  }

  #[test]
  fn test_storage_failure_is_reported() {
    let (queue, store) = queue();
    store.set_reject_writes(true);

    assert!(queue.enqueue(WriteKind::CreateComment, json!({})).is_err());
    assert!(queue.is_empty().unwrap());
  }

  #[test]
  fn test_pending_reactions_filters_by_pair() {
    let (queue, _store) = queue();
    let target = json!({"commentId": "c1", "userId": "u1", "reactionType": "like"});
    let other = json!({"commentId": "c2", "userId": "u1", "reactionType": "like"});
    let first = queue.enqueue(WriteKind::ToggleReaction, target.clone()).unwrap();
    queue.enqueue(WriteKind::ToggleReaction, other).unwrap();
    queue.enqueue(WriteKind::CreateComment, json!({"topicId": "t1"})).unwrap();
    let second = queue.enqueue(WriteKind::ToggleReaction, target).unwrap();

    let ids: Vec<_> = queue
      .pending_reactions("c1", "u1")
      .unwrap()
      .into_iter()
      .map(|w| w.id)
      .collect();
    assert_eq!(ids, vec![first.id, second.id]);
  }

  #[test]
  fn test_claimed_write_cannot_be_cancelled() {
    let (queue, _store) = queue();
    let write = queue.enqueue(WriteKind::ToggleReaction, json!({})).unwrap();

    assert!(queue.claim(&write.id).unwrap());
    assert!(!queue.claim(&write.id).unwrap());
    assert!(!queue.cancel(&write.id).unwrap());
    assert_eq!(queue.len().unwrap(), 1);

    queue.release(&write.id);
    assert!(!queue.is_claimed(&write.id));
    assert!(queue.cancel(&write.id).unwrap());
    assert!(!queue.claim(&write.id).unwrap());
  }

  #[test]
  fn test_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    let id = {
      let queue = OfflineQueue::new(Arc::new(SqliteStore::open(&path).unwrap()));
      queue
        .enqueue(WriteKind::ToggleReaction, json!({"commentId": "c1"}))
        .unwrap()
        .id
    };

    let queue = OfflineQueue::new(Arc::new(SqliteStore::open(&path).unwrap()));
    let write = queue.get(&id).unwrap().unwrap();
    assert_eq!(write.kind, WriteKind::ToggleReaction);
    assert_eq!(write.payload["commentId"], "c1");
  }
}

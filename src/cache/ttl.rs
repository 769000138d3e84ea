//! Bounded in-memory cache with per-entry expiry.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::clock::{Clock, SystemClock};

/// A stored value together with its expiry metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
  pub value: V,
  pub stored_at: DateTime<Utc>,
  pub ttl: Duration,
}

impl<V> CacheEntry<V> {
  /// An entry is gone once its full TTL has elapsed.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now - self.stored_at >= self.ttl
  }
}

/// Snapshot of a cache's occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
  pub name: String,
  pub size: usize,
  pub max_size: usize,
  pub keys: Vec<String>,
}

struct Inner<V> {
  entries: HashMap<String, CacheEntry<V>>,
  /// Keys in insertion order, oldest first.
  order: VecDeque<String>,
}

/// In-memory key/value cache with TTL expiry and insertion-order eviction.
///
/// Expired entries are dropped lazily on read (or by [`purge_expired`]). When
/// the cache is full, inserting a new key evicts the oldest-inserted one;
/// reads do not refresh an entry's position.
///
/// [`purge_expired`]: TtlCache::purge_expired
pub struct TtlCache<V> {
  name: String,
  inner: Mutex<Inner<V>>,
  max_entries: usize,
  default_ttl: Duration,
  clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
  pub fn new(name: impl Into<String>, max_entries: usize, default_ttl: Duration) -> Self {
    Self {
      name: name.into(),
      inner: Mutex::new(Inner {
        entries: HashMap::new(),
        order: VecDeque::new(),
      }),
      max_entries: max_entries.max(1),
      default_ttl,
      clock: Arc::new(SystemClock),
    }
  }

  /// Use a different time source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  fn lock(&self) -> MutexGuard<'_, Inner<V>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Store `value` under `key` for `ttl`.
  pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
    let key = key.into();
    let entry = CacheEntry {
      value,
      stored_at: self.clock.now(),
      ttl,
    };
    let mut inner = self.lock();

    // Overwrites keep their original insertion slot.
    if let Some(existing) = inner.entries.get_mut(&key) {
      *existing = entry;
      return;
    }

    while inner.entries.len() >= self.max_entries {
      let Some(oldest) = inner.order.pop_front() else {
        break;
      };
      inner.entries.remove(&oldest);
      debug!(cache = %self.name, key = %oldest, "evicted oldest entry");
    }

    inner.order.push_back(key.clone());
    inner.entries.insert(key, entry);
  }

  /// Store `value` with this cache's default TTL.
  pub fn insert(&self, key: impl Into<String>, value: V) {
    self.set(key, value, self.default_ttl);
  }

  /// Fetch a live entry, dropping it if it has expired.
  pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
    let now = self.clock.now();
    let mut inner = self.lock();

    let expired = inner.entries.get(key)?.is_expired(now);
    if expired {
      inner.entries.remove(key);
      inner.order.retain(|k| k != key);
      return None;
    }

    inner.entries.get(key).cloned()
  }

  pub fn get(&self, key: &str) -> Option<V> {
    self.get_entry(key).map(|entry| entry.value)
  }

  /// Remove exactly `key`.
  pub fn remove(&self, key: &str) -> bool {
    let mut inner = self.lock();
    let removed = inner.entries.remove(key).is_some();
    if removed {
      inner.order.retain(|k| k != key);
    }
    removed
  }

  /// Remove every key containing `pattern` (an exact key matches itself).
  ///
  /// Returns the number of entries dropped.
  pub fn invalidate(&self, pattern: &str) -> usize {
    let mut inner = self.lock();
    let before = inner.entries.len();
    inner.entries.retain(|key, _| !key.contains(pattern));
    inner.order.retain(|key| !key.contains(pattern));
    let removed = before - inner.entries.len();
    if removed > 0 {
      debug!(cache = %self.name, pattern, removed, "invalidated entries");
    }
    removed
  }

  pub fn clear(&self) {
    let mut inner = self.lock();
    inner.entries.clear();
    inner.order.clear();
  }

  /// Drop every expired entry now instead of waiting for a read.
  pub fn purge_expired(&self) -> usize {
    let now = self.clock.now();
    let mut inner = self.lock();
    let before = inner.entries.len();
    inner.entries.retain(|_, entry| !entry.is_expired(now));
    let Inner { entries, order } = &mut *inner;
    order.retain(|key| entries.contains_key(key));
    before - entries.len()
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> CacheStats {
    let inner = self.lock();
    CacheStats {
      name: self.name.clone(),
      size: inner.entries.len(),
      max_size: self.max_entries,
      keys: inner.order.iter().cloned().collect(),
    }
  }
}

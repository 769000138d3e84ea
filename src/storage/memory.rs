use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::KeyValueStore;

/// Volatile store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryStore {
  items: Mutex<BTreeMap<String, String>>,
  /// When set, every write fails. Lets callers exercise quota errors.
  reject_writes: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make subsequent writes fail as if storage were full.
  pub fn set_reject_writes(&self, reject: bool) {
    self.reject_writes.store(reject, Ordering::SeqCst);
  }
}

impl KeyValueStore for MemoryStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let items = self.items.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    if self.reject_writes.load(Ordering::SeqCst) {
      return Err(eyre!("Storage quota exceeded"));
    }
    let mut items = self.items.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    items.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<bool> {
    let mut items = self.items.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.remove(key).is_some())
  }

  fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
    let items = self.items.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      items
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, _)| key.clone())
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_list_keys_by_prefix() {
    let store = MemoryStore::new();
    store.set_item("a:2", "x").unwrap();
    store.set_item("a:1", "x").unwrap();
    store.set_item("b:1", "x").unwrap();

    assert_eq!(store.list_keys("a:").unwrap(), vec!["a:1", "a:2"]);
  }

  #[test]
  fn test_rejected_writes() {
    let store = MemoryStore::new();
    store.set_reject_writes(true);
    assert!(store.set_item("k", "v").is_err());
    assert_eq!(store.get_item("k").unwrap(), None);
  }
}

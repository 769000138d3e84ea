//! Storage port for data that must survive a restart.
//!
//! The offline queue only needs a string key/value store. Backends:
//! - [`SqliteStore`] for the CLI and any long-lived process
//! - [`MemoryStore`] for tests and ephemeral sessions

mod memory;
mod sqlite;

use color_eyre::Result;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Minimal durable key/value store.
pub trait KeyValueStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  /// Returns whether a value was present.
  fn remove_item(&self, key: &str) -> Result<bool>;

  /// Keys starting with `prefix`, in ascending order.
  fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

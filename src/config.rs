use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::strategy::StrategyRule;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Ordered path-prefix rules replacing the built-in strategy table
  #[serde(default)]
  pub strategies: Option<Vec<StrategyRule>>,
  #[serde(default)]
  pub offline: OfflineConfig,
  /// Values supplied by the host page embedding the widget
  #[serde(default)]
  pub widget: WidgetConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Origin of the comment API. Request paths are absolute, so any path
  /// component here is replaced.
  pub base_url: String,
  /// Per-request timeout. A timed-out fetch counts as a network failure.
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000".to_string(),
      timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Capacity of each cache (client cache and every partition)
  pub max_entries: usize,
  pub comments_ttl_secs: i64,
  pub users_ttl_secs: i64,
  pub topics_ttl_secs: i64,
  pub static_ttl_secs: i64,
  pub api_ttl_secs: i64,
  pub dynamic_ttl_secs: i64,
  pub sweep_interval_secs: u64,
  /// GET paths fetched into the api partition on `warm`
  pub warm_paths: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: 100,
      comments_ttl_secs: 5 * 60,
      users_ttl_secs: 30 * 60,
      topics_ttl_secs: 60 * 60,
      static_ttl_secs: 365 * 24 * 60 * 60,
      api_ttl_secs: 24 * 60 * 60,
      dynamic_ttl_secs: 7 * 24 * 60 * 60,
      sweep_interval_secs: 60 * 60,
      warm_paths: vec![
        "/api/comments-ultra/popular-topics".to_string(),
        "/api/comments-ultra/active-users".to_string(),
      ],
    }
  }
}

impl CacheConfig {
  pub fn ttls(&self) -> CacheTtls {
    CacheTtls {
      comments: Duration::seconds(self.comments_ttl_secs),
      users: Duration::seconds(self.users_ttl_secs),
      topics: Duration::seconds(self.topics_ttl_secs),
    }
  }

  pub fn partition_ttls(&self) -> PartitionTtls {
    PartitionTtls {
      static_assets: Duration::seconds(self.static_ttl_secs),
      api: Duration::seconds(self.api_ttl_secs),
      dynamic: Duration::seconds(self.dynamic_ttl_secs),
    }
  }
}

/// Lifetimes of entries in the client cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
  pub comments: Duration,
  pub users: Duration,
  pub topics: Duration,
}

impl Default for CacheTtls {
  fn default() -> Self {
    CacheConfig::default().ttls()
  }
}

/// Lifetimes of entries in each router partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTtls {
  pub static_assets: Duration,
  pub api: Duration,
  pub dynamic: Duration,
}

impl Default for PartitionTtls {
  fn default() -> Self {
    CacheConfig::default().partition_ttls()
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// SQLite file holding queued writes (default: $XDG_DATA_HOME/comment-cache/offline.db)
  pub queue_path: Option<PathBuf>,
  /// How often `watch` probes the health endpoint
  pub probe_interval_secs: u64,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      queue_path: None,
      probe_interval_secs: 30,
    }
  }
}

/// Embedding contract: opaque values handed over by the host page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WidgetConfig {
  pub topic_id: Option<String>,
  pub user_id: Option<String>,
  pub display_name: Option<String>,
  pub avatar_url: Option<String>,
  pub title: Option<String>,
  pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive, overridden by RUST_LOG
  pub level: String,
  /// Write daily-rotated log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./comment-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/comment-cache/config.yaml
  ///
  /// With no file found, defaults are used. `COMMENT_CACHE_BASE_URL`
  /// overrides the API origin either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(base_url) = std::env::var("COMMENT_CACHE_BASE_URL") {
      config.api.base_url = base_url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("comment-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("comment-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not an empty map
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks COMMENT_CACHE_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("COMMENT_CACHE_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}

use serde::{Deserialize, Serialize};

use crate::transport::ApiRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  /// Serve from cache, fall back to the network on a miss
  CacheFirst,
  /// Try the network, fall back to cache on failure
  NetworkFirst,
  /// Serve cache immediately while refreshing it in the background
  StaleWhileRevalidate,
  /// Always hit the network, never cache
  NetworkOnly,
}

impl Strategy {
  /// The partition this strategy reads from and writes to.
  pub fn partition(self) -> Option<Partition> {
    match self {
      Strategy::CacheFirst => Some(Partition::Static),
      Strategy::NetworkFirst => Some(Partition::Api),
      Strategy::StaleWhileRevalidate => Some(Partition::Dynamic),
      Strategy::NetworkOnly => None,
    }
  }
}

impl std::fmt::Display for Strategy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Strategy::CacheFirst => "cache-first",
      Strategy::NetworkFirst => "network-first",
      Strategy::StaleWhileRevalidate => "stale-while-revalidate",
      Strategy::NetworkOnly => "network-only",
    };
    f.write_str(name)
  }
}

/// Named cache bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
  Static,
  Api,
  Dynamic,
}

impl Partition {
  pub const ALL: [Partition; 3] = [Partition::Static, Partition::Api, Partition::Dynamic];

  pub fn name(self) -> &'static str {
    match self {
      Partition::Static => "static",
      Partition::Api => "api",
      Partition::Dynamic => "dynamic",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRule {
  pub prefix: String,
  pub strategy: Strategy,
}

impl StrategyRule {
  pub fn new(prefix: impl Into<String>, strategy: Strategy) -> Self {
    Self {
      prefix: prefix.into(),
      strategy,
    }
  }
}

/// Ordered prefix table. First match wins; no match means
/// stale-while-revalidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyTable {
  rules: Vec<StrategyRule>,
}

impl StrategyTable {
  pub fn new(rules: Vec<StrategyRule>) -> Self {
    Self { rules }
  }

  pub fn rules(&self) -> &[StrategyRule] {
    &self.rules
  }

  /// Pick the strategy for a request. Anything but a GET is network-only
  /// whatever its path.
  pub fn select(&self, request: &ApiRequest) -> Strategy {
    if !request.method.is_read() {
      return Strategy::NetworkOnly;
    }

    let pathname = request.pathname();
    self
      .rules
      .iter()
      .find(|rule| pathname.starts_with(&rule.prefix))
      .map(|rule| rule.strategy)
      .unwrap_or(Strategy::StaleWhileRevalidate)
  }
}

impl Default for StrategyTable {
  fn default() -> Self {
    use Strategy::*;

    Self::new(vec![
      StrategyRule::new("/embed/", CacheFirst),
      StrategyRule::new("/static/", CacheFirst),
      StrategyRule::new("/assets/", CacheFirst),
      StrategyRule::new("/api/comments-ultra/", NetworkFirst),
      StrategyRule::new("/api/users/", StaleWhileRevalidate),
      StrategyRule::new("/api/topics/", StaleWhileRevalidate),
      StrategyRule::new("/api/comments/create", NetworkOnly),
      StrategyRule::new("/api/comments/update", NetworkOnly),
      StrategyRule::new("/api/comments/delete", NetworkOnly),
    ])
  }
}

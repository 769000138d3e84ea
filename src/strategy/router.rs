//! Executes fetch strategies against the cache partitions and the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::table::{Partition, Strategy, StrategyTable};
use crate::cache::{CacheStats, Clock, SystemClock, TtlCache};
use crate::config::PartitionTtls;
use crate::error::TransportError;
use crate::transport::{ApiRequest, HttpResponse, Transport};

type FetchHandle = JoinHandle<Result<HttpResponse, TransportError>>;

/// A background refresh started by stale-while-revalidate.
///
/// Dropping it detaches the refresh; it still updates the cache when it lands.
#[derive(Debug)]
pub struct Revalidation {
  handle: FetchHandle,
}

impl Revalidation {
  /// Wait for the refresh to finish.
  pub async fn wait(self) -> Result<HttpResponse, TransportError> {
    self
      .handle
      .await
      .map_err(|e| TransportError::Other(format!("revalidation task failed: {}", e)))?
  }

  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }
}

/// Result of routing one request.
#[derive(Debug)]
pub struct Routed {
  pub strategy: Strategy,
  pub response: HttpResponse,
  /// Set when a stale cached body was returned and a refresh is in flight
  pub revalidation: Option<Revalidation>,
}

impl Routed {
  fn done(strategy: Strategy, response: HttpResponse) -> Self {
    Self {
      strategy,
      response,
      revalidation: None,
    }
  }
}

/// Picks a strategy per request and executes it.
///
/// Network calls are bounded by `timeout`. A call that times out is treated as
/// a failure, but keeps running and still stores its response if it succeeds
/// later.
pub struct StrategyRouter {
  transport: Arc<dyn Transport>,
  table: StrategyTable,
  partitions: HashMap<Partition, Arc<TtlCache<HttpResponse>>>,
  timeout: Duration,
}

impl StrategyRouter {
  pub fn new(
    transport: Arc<dyn Transport>,
    table: StrategyTable,
    max_entries: usize,
    ttls: PartitionTtls,
    timeout: Duration,
  ) -> Self {
    Self::with_clock(transport, table, max_entries, ttls, timeout, Arc::new(SystemClock))
  }

  pub fn with_clock(
    transport: Arc<dyn Transport>,
    table: StrategyTable,
    max_entries: usize,
    ttls: PartitionTtls,
    timeout: Duration,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let partitions = Partition::ALL
      .into_iter()
      .map(|partition| {
        let ttl = match partition {
          Partition::Static => ttls.static_assets,
          Partition::Api => ttls.api,
          Partition::Dynamic => ttls.dynamic,
        };
        let cache = TtlCache::new(partition.name(), max_entries, ttl).with_clock(Arc::clone(&clock));
        (partition, Arc::new(cache))
      })
      .collect();

    Self {
      transport,
      table,
      partitions,
      timeout,
    }
  }

  pub fn table(&self) -> &StrategyTable {
    &self.table
  }

  pub fn partition(&self, partition: Partition) -> &Arc<TtlCache<HttpResponse>> {
    // Every partition is created in the constructor
    &self.partitions[&partition]
  }

  /// Route a request through the strategy its path maps to.
  pub async fn fetch(&self, request: ApiRequest) -> Routed {
    let strategy = self.table.select(&request);
    debug!(%strategy, method = request.method.as_str(), path = %request.path, "routing request");

    match strategy {
      Strategy::CacheFirst => Routed::done(strategy, self.cache_first(request).await),
      Strategy::NetworkFirst => Routed::done(strategy, self.network_first(request).await),
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
      Strategy::NetworkOnly => Routed::done(strategy, self.network_only(request).await),
    }
  }

  async fn cache_first(&self, request: ApiRequest) -> HttpResponse {
    let key = request.cache_key();
    if let Some(hit) = self.lookup(Partition::Static, &key) {
      return hit;
    }

    match self.network(request, Some(Partition::Static)).await {
      Ok(response) => response,
      Err(e) => {
        warn!(path = %key, error = %e, "cache-first: network failed with nothing cached");
        HttpResponse::unavailable()
      }
    }
  }

  async fn network_first(&self, request: ApiRequest) -> HttpResponse {
    let key = request.cache_key();
    match self.network(request, Some(Partition::Api)).await {
      Ok(response) => response,
      Err(e) => {
        debug!(path = %key, error = %e, "network-first: falling back to cache");
        self
          .lookup(Partition::Api, &key)
          .unwrap_or_else(HttpResponse::unavailable)
      }
    }
  }

  async fn stale_while_revalidate(&self, request: ApiRequest) -> Routed {
    let strategy = Strategy::StaleWhileRevalidate;
    let key = request.cache_key();
    let cached = self.lookup(Partition::Dynamic, &key);
    let handle = self.spawn_fetch(request, Some(Partition::Dynamic));

    if let Some(stale) = cached {
      return Routed {
        strategy,
        response: stale,
        revalidation: Some(Revalidation { handle }),
      };
    }

    match self.await_fetch(handle).await {
      Ok(response) => Routed::done(strategy, response),
      Err(e) => {
        warn!(path = %key, error = %e, "stale-while-revalidate: no cache and network failed");
        Routed::done(strategy, HttpResponse::unavailable())
      }
    }
  }

  async fn network_only(&self, request: ApiRequest) -> HttpResponse {
    let path = request.path.clone();
    match self.network(request, None).await {
      Ok(response) => response,
      Err(e) => {
        warn!(%path, error = %e, "network-only request failed");
        HttpResponse::unavailable()
      }
    }
  }

  fn lookup(&self, partition: Partition, key: &str) -> Option<HttpResponse> {
    self
      .partition(partition)
      .get_entry(key)
      .map(|entry| entry.value.into_cached(entry.stored_at))
  }

  async fn network(
    &self,
    request: ApiRequest,
    store_in: Option<Partition>,
  ) -> Result<HttpResponse, TransportError> {
    let handle = self.spawn_fetch(request, store_in);
    self.await_fetch(handle).await
  }

  /// Start a fetch that stores 2xx responses in `store_in` on completion.
  fn spawn_fetch(&self, request: ApiRequest, store_in: Option<Partition>) -> FetchHandle {
    let transport = Arc::clone(&self.transport);
    let cache = store_in.map(|partition| Arc::clone(self.partition(partition)));

    tokio::spawn(async move {
      let response = transport.send(&request).await?;
      if let Some(cache) = cache {
        if response.is_success() {
          cache.insert(request.cache_key(), response.clone());
        }
      }
      Ok(response)
    })
  }

  async fn await_fetch(&self, handle: FetchHandle) -> Result<HttpResponse, TransportError> {
    match tokio::time::timeout(self.timeout, handle).await {
      Ok(Ok(result)) => result,
      Ok(Err(e)) => Err(TransportError::Other(format!("fetch task failed: {}", e))),
      Err(_) => Err(TransportError::Timeout),
    }
  }

  /// Drop every entry whose key contains `pattern` from every partition.
  pub fn invalidate(&self, pattern: &str) -> usize {
    self
      .partitions
      .values()
      .map(|cache| cache.invalidate(pattern))
      .sum()
  }

  pub fn clear_all(&self) {
    for cache in self.partitions.values() {
      cache.clear();
    }
    info!("all cache partitions cleared");
  }

  /// Purge expired entries from every partition.
  pub fn sweep(&self) -> usize {
    let removed = self
      .partitions
      .values()
      .map(|cache| cache.purge_expired())
      .sum();
    debug!(removed, "cache sweep completed");
    removed
  }

  /// Run [`sweep`](Self::sweep) every `interval` until the handle is aborted.
  pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
    let router = Arc::clone(self);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        router.sweep();
      }
    })
  }

  /// Prefetch `paths` into the api partition. Returns how many were stored.
  pub async fn warm(&self, paths: &[String]) -> usize {
    let mut warmed = 0;
    for path in paths {
      match self.network(ApiRequest::get(path.as_str()), Some(Partition::Api)).await {
        Ok(response) if response.is_success() => warmed += 1,
        Ok(response) => debug!(%path, status = response.status, "warm: not cached"),
        Err(e) => warn!(%path, error = %e, "warm: fetch failed"),
      }
    }
    info!(warmed, requested = paths.len(), "cache warmed");
    warmed
  }

  pub fn stats(&self) -> Vec<CacheStats> {
    Partition::ALL
      .into_iter()
      .map(|partition| self.partition(partition).stats())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ManualClock;
  use crate::testing::FakeTransport;
  use crate::transport::{Method, ResponseSource};
  use serde_json::json;

  fn router_with(transport: Arc<FakeTransport>, timeout: Duration) -> StrategyRouter {
    StrategyRouter::new(
      transport,
      StrategyTable::default(),
      100,
      PartitionTtls::default(),
      timeout,
    )
  }

  fn router(transport: Arc<FakeTransport>) -> StrategyRouter {
    router_with(transport, Duration::from_secs(10))
  }

  #[tokio::test]
  async fn test_cache_first_serves_cache_without_network() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(Method::Get, "/embed/comment-widget.js", 200, "v1");
    let router = router(transport.clone());

    let first = router.fetch(ApiRequest::get("/embed/comment-widget.js")).await;
    assert_eq!(first.response.source, ResponseSource::Network);

    transport.respond(Method::Get, "/embed/comment-widget.js", 200, "v2");
    let second = router.fetch(ApiRequest::get("/embed/comment-widget.js")).await;

    assert_eq!(second.strategy, Strategy::CacheFirst);
    assert_eq!(second.response.text(), "v1");
    assert_eq!(second.response.source, ResponseSource::Cache);
    assert_eq!(transport.call_count("/embed/comment-widget.js"), 1);
  }

  #[tokio::test]
  async fn test_cache_first_offline_empty_is_unavailable() {
    let transport = Arc::new(FakeTransport::new());
    transport.set_online(false);
    let router = router(transport);

    let routed = router.fetch(ApiRequest::get("/static/topics/popular.json")).await;
    assert!(routed.response.is_unavailable());
    assert_eq!(routed.response.status, 503);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(Method::Get, "/assets/app.css", 500, "boom");
    let router = router(transport.clone());

    let routed = router.fetch(ApiRequest::get("/assets/app.css")).await;
    assert_eq!(routed.response.status, 500);
    assert!(router.partition(Partition::Static).is_empty());
  }

  #[tokio::test]
  async fn test_network_first_prefers_network_then_falls_back() {
    let transport = Arc::new(FakeTransport::new());
    let path = "/api/comments-ultra/list?topicId=a";
    transport.respond_json(Method::Get, "/api/comments-ultra/list", 200, json!({"comments": [1]}));
    let router = router(transport.clone());

    let online = router.fetch(ApiRequest::get(path)).await;
    assert_eq!(online.response.source, ResponseSource::Network);

    transport.set_online(false);
    let offline = router.fetch(ApiRequest::get(path)).await;
    assert_eq!(offline.response.source, ResponseSource::Cache);
    assert_eq!(offline.response.json::<serde_json::Value>().unwrap(), json!({"comments": [1]}));

    let uncached = router.fetch(ApiRequest::get("/api/comments-ultra/list?topicId=b")).await;
    assert!(uncached.response.is_unavailable());
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_returns_stale_then_fresh() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(Method::Get, "/api/users/1", 200, "old");
    let router = router(transport.clone());

    let first = router.fetch(ApiRequest::get("/api/users/1")).await;
    assert_eq!(first.response.text(), "old");
    assert!(first.revalidation.is_none());

    transport.respond(Method::Get, "/api/users/1", 200, "new");
    let second = router.fetch(ApiRequest::get("/api/users/1")).await;
    assert_eq!(second.response.text(), "old");
    assert_eq!(second.response.source, ResponseSource::Cache);

    let refreshed = second.revalidation.unwrap().wait().await.unwrap();
    assert_eq!(refreshed.text(), "new");

    let third = router.fetch(ApiRequest::get("/api/users/1")).await;
    assert_eq!(third.response.text(), "new");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_masks_network_failure() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(Method::Get, "/api/topics/t1", 200, "cached");
    let router = router(transport.clone());
    router.fetch(ApiRequest::get("/api/topics/t1")).await;

    transport.set_online(false);
    let routed = router.fetch(ApiRequest::get("/api/topics/t1")).await;
    assert_eq!(routed.response.text(), "cached");
    assert!(routed.revalidation.unwrap().wait().await.is_err());

    let missing = router.fetch(ApiRequest::get("/api/topics/t2")).await;
    assert!(missing.response.is_unavailable());
  }

  #[tokio::test]
  async fn test_network_only_never_caches() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond_json(Method::Post, "/api/comments/create", 200, json!({"comment": {}}));
    let router = router(transport.clone());

    let routed = router
      .fetch(ApiRequest::post("/api/comments/create", json!({"content": "hi"})))
      .await;
    assert_eq!(routed.strategy, Strategy::NetworkOnly);
    assert!(routed.response.is_success());
    assert!(router.stats().iter().all(|stats| stats.size == 0));

    transport.set_online(false);
    let offline = router
      .fetch(ApiRequest::post("/api/comments/create", json!({"content": "hi"})))
      .await;
    assert!(offline.response.is_unavailable());
  }

  #[tokio::test]
  async fn test_timeout_falls_back_but_late_response_still_caches() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(Method::Get, "/api/comments-ultra/slow", 200, "late");
    transport.set_delay(Some(Duration::from_millis(100)));
    let router = router_with(transport.clone(), Duration::from_millis(20));

    let routed = router.fetch(ApiRequest::get("/api/comments-ultra/slow")).await;
    assert!(routed.response.is_unavailable());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let cached = router.partition(Partition::Api).get("/api/comments-ultra/slow");
    assert_eq!(cached.map(|r| r.text()), Some("late".to_string()));
  }

  #[tokio::test]
  async fn test_invalidate_and_sweep() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(Method::Get, "/api/users/1", 200, "u1");
    transport.respond(Method::Get, "/api/topics/1", 200, "t1");
    let clock = Arc::new(ManualClock::default());
    let router = StrategyRouter::with_clock(
      transport,
      StrategyTable::default(),
      100,
      PartitionTtls::default(),
      Duration::from_secs(10),
      clock.clone(),
    );

    router.fetch(ApiRequest::get("/api/users/1")).await;
    router.fetch(ApiRequest::get("/api/topics/1")).await;
    assert_eq!(router.invalidate("/api/users/"), 1);

    clock.advance(chrono::Duration::days(8));
    assert_eq!(router.sweep(), 1);
    assert!(router.partition(Partition::Dynamic).is_empty());
  }

  #[tokio::test]
  async fn test_warm_fills_api_partition() {
    let transport = Arc::new(FakeTransport::new());
    transport.respond(Method::Get, "/api/comments-ultra/popular-topics", 200, "[]");
    let router = router(transport);

    let warmed = router
      .warm(&[
        "/api/comments-ultra/popular-topics".to_string(),
        "/api/comments-ultra/active-users".to_string(),
      ])
      .await;

    assert_eq!(warmed, 1);
    assert_eq!(router.partition(Partition::Api).len(), 1);

    router.clear_all();
    assert!(router.partition(Partition::Api).is_empty());
  }
}

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{DataAccess, NewComment};
use crate::cache::TtlCache;
use crate::config::Config;
use crate::offline::{spawn_connectivity_probe, BackgroundSync, OfflineQueue, SyncTrigger, SyncWorker};
use crate::storage::{KeyValueStore, SqliteStore};
use crate::strategy::{StrategyRouter, StrategyTable};
use crate::transport::{HttpTransport, Transport};

/// Process-wide services wired from a [`Config`].
///
/// Owns the router partitions, the client cache, the offline queue and the
/// background tasks. Dropping it stops the sweeper.
pub struct App {
  config: Config,
  router: Arc<StrategyRouter>,
  data: Arc<DataAccess>,
  queue: Arc<OfflineQueue>,
  sync: Arc<BackgroundSync>,
  sweeper: Option<JoinHandle<()>>,
}

impl App {
  /// Build against the real API and the on-disk queue.
  pub fn new(config: Config) -> Result<Self> {
    let transport = HttpTransport::new(&config.api, Config::get_api_token())?;

    let queue_path = match &config.offline.queue_path {
      Some(path) => path.clone(),
      None => SqliteStore::default_path()?,
    };
    let store = SqliteStore::open(&queue_path)?;
    debug!(path = %queue_path.display(), "opened offline queue");

    Ok(Self::with_services(config, Arc::new(transport), Arc::new(store)))
  }

  /// Build around an arbitrary transport and store.
  pub fn with_services(
    config: Config,
    transport: Arc<dyn Transport>,
    store: Arc<dyn KeyValueStore>,
  ) -> Self {
    let table = match &config.strategies {
      Some(rules) => StrategyTable::new(rules.clone()),
      None => StrategyTable::default(),
    };
    let router = Arc::new(StrategyRouter::new(
      Arc::clone(&transport),
      table,
      config.cache.max_entries,
      config.cache.partition_ttls(),
      Duration::from_secs(config.api.timeout_secs),
    ));

    let ttls = config.cache.ttls();
    let cache = Arc::new(TtlCache::new("client", config.cache.max_entries, ttls.comments));
    let queue = Arc::new(OfflineQueue::new(store));

    let data = Arc::new(DataAccess::new(
      Arc::clone(&router),
      transport,
      Arc::clone(&cache),
      Arc::clone(&queue),
      ttls,
    ));
    let sync = Arc::new(BackgroundSync::new(
      Arc::clone(&queue),
      Arc::clone(&router),
      cache,
    ));

    Self {
      config,
      router,
      data,
      queue,
      sync,
      sweeper: None,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn data(&self) -> &Arc<DataAccess> {
    &self.data
  }

  pub fn router(&self) -> &Arc<StrategyRouter> {
    &self.router
  }

  pub fn queue(&self) -> &Arc<OfflineQueue> {
    &self.queue
  }

  pub fn sync(&self) -> &Arc<BackgroundSync> {
    &self.sync
  }

  /// Start the periodic partition sweep. Needs a running tokio runtime.
  pub fn start_sweeper(&mut self) {
    if self.sweeper.is_none() {
      let interval = Duration::from_secs(self.config.cache.sweep_interval_secs.max(1));
      self.sweeper = Some(self.router.spawn_sweeper(interval));
    }
  }

  pub fn spawn_sync_worker(&self) -> SyncWorker {
    SyncWorker::spawn(Arc::clone(&self.sync))
  }

  /// Probe `/health` on the configured interval and request a sync pass
  /// whenever the API becomes reachable.
  pub fn spawn_probe(&self, notifier: mpsc::UnboundedSender<SyncTrigger>) -> JoinHandle<()> {
    let interval = Duration::from_secs(self.config.offline.probe_interval_secs.max(1));
    let data = Arc::clone(&self.data);
    spawn_connectivity_probe(
      interval,
      move || {
        let data = Arc::clone(&data);
        async move { data.health().await.map(|h| h.is_healthy()).unwrap_or(false) }
      },
      notifier,
    )
  }

  /// Body of a new comment, with the host-page fields from `widget`.
  pub fn new_comment(
    &self,
    topic_id: &str,
    user_id: &str,
    content: &str,
    parent_id: Option<String>,
  ) -> NewComment {
    let widget = &self.config.widget;
    NewComment {
      topic_id: topic_id.to_string(),
      user_id: user_id.to_string(),
      content: content.to_string(),
      parent_id,
      username: widget.display_name.clone(),
      user_img: widget.avatar_url.clone(),
      title: widget.title.clone(),
      url: widget.url.clone(),
    }
  }

  /// Stop background tasks and wait for pending revalidations.
  pub async fn shutdown(mut self) {
    if let Some(sweeper) = self.sweeper.take() {
      sweeper.abort();
    }
    self.data.settle().await;
    info!("shut down");
  }
}

impl Drop for App {
  fn drop(&mut self) {
    if let Some(sweeper) = self.sweeper.take() {
      sweeper.abort();
    }
  }
}

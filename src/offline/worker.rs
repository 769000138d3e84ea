//! Background task that runs sync passes and watches connectivity.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::sync::{BackgroundSync, SyncReport, SyncTrigger};

/// Runs sync passes in the background as triggers arrive.
///
/// Triggers queued while a pass runs collapse into a single follow-up pass.
pub struct SyncWorker {
  tx: mpsc::UnboundedSender<SyncTrigger>,
  reports: mpsc::UnboundedReceiver<SyncReport>,
  handle: JoinHandle<()>,
}

impl SyncWorker {
  pub fn spawn(sync: Arc<BackgroundSync>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<SyncTrigger>();
    let (report_tx, reports) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
      while let Some(mut trigger) = rx.recv().await {
        while let Ok(next) = rx.try_recv() {
          trigger = next;
        }

        let report = sync.trigger(trigger).await;
        // Nobody listening for reports is fine
        let _ = report_tx.send(report);
      }
      debug!("sync worker stopped");
    });

    Self {
      tx,
      reports,
      handle,
    }
  }

  /// A sender other tasks can use to request a pass.
  pub fn notifier(&self) -> mpsc::UnboundedSender<SyncTrigger> {
    self.tx.clone()
  }

  /// Request a pass. Returns false if the worker has stopped.
  pub fn notify(&self, trigger: SyncTrigger) -> bool {
    self.tx.send(trigger).is_ok()
  }

  /// Receive the report of the next finished pass
  pub async fn next_report(&mut self) -> Option<SyncReport> {
    self.reports.recv().await
  }

  /// Stop accepting triggers and wait for the current pass to finish.
  ///
  /// Senders handed out by [`notifier`](Self::notifier) keep the worker
  /// alive until they are dropped too.
  pub async fn shutdown(self) {
    let SyncWorker { tx, handle, .. } = self;
    drop(tx);
    let _ = handle.await;
  }
}

/// Poll `probe` every `interval` and send [`SyncTrigger::ConnectivityRestored`]
/// whenever it flips from unreachable to reachable.
///
/// The first reachable probe counts as a transition, so writes left over
/// from an earlier run are flushed once the API answers.
pub fn spawn_connectivity_probe<F, Fut>(
  interval: Duration,
  probe: F,
  notifier: mpsc::UnboundedSender<SyncTrigger>,
) -> JoinHandle<()>
where
  F: Fn() -> Fut + Send + 'static,
  Fut: Future<Output = bool> + Send,
{
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    let mut was_online = false;
    loop {
      ticker.tick().await;
      let online = probe().await;
      if online && !was_online {
        info!("API reachable, requesting sync");
        if notifier.send(SyncTrigger::ConnectivityRestored).is_err() {
          break;
        }
      } else if !online && was_online {
        info!("API unreachable, writes will be queued");
      }
      was_online = online;
    }
  })
}

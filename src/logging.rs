//! Tracing subscriber setup for stderr or a rolling log file.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "comment-cache.log";

/// Build the filter: `RUST_LOG` wins, the configured level otherwise.
fn env_filter(level: &str) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global tracing subscriber.
///
/// With a log directory configured, output goes to a daily rolling file
/// through a non-blocking writer; keep the returned guard alive until exit
/// or buffered lines are lost. Without one, output goes to stderr.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let (fmt_layer, guard) = match &config.directory {
    Some(directory) => {
      std::fs::create_dir_all(directory)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;
      let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
      (layer, Some(guard))
    }
    None => (
      fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .boxed(),
      None,
    ),
  };

  tracing_subscriber::registry()
    .with(env_filter(&config.level))
    .with(fmt_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

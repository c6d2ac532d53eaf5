//! Tracing subscriber setup.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// With file logging enabled, a daily-rotated file is written under
/// `<data_dir>/logs`; keep the returned guard alive to flush it.
pub fn init(config: &LoggingConfig, data_dir: &Path) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

  let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

  if !config.file {
    tracing_subscriber::registry()
      .with(filter)
      .with(console)
      .try_init()
      .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
    return Ok(None);
  }

  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "qmaker.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let file = fmt::layer().with_writer(writer).with_ansi(false);

  tracing_subscriber::registry()
    .with(filter)
    .with(console)
    .with(file)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  tracing::debug!(log_dir = %log_dir.display(), "File logging enabled");
  Ok(Some(guard))
}

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

const LOG_FILE_PREFIX: &str = "activity-cache.log";

/// Install the global subscriber.
///
/// Logs go to a daily rolling file under `log_dir`; `verbose` mirrors them to
/// stderr. RUST_LOG overrides the configured level. Keep the returned guard
/// alive until exit or buffered lines are lost.
pub fn init(config: &LoggingConfig, log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir).map_err(|e| {
    Error::Config(format!(
      "failed to create log directory {}: {}",
      log_dir.display(),
      e
    ))
  })?;

  let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.level))
    .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", config.level, e)))?;

  let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(stderr)
    .try_init()
    .map_err(|e| Error::Config(format!("failed to install log subscriber: {}", e)))?;

  Ok(guard)
}

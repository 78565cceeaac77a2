//! Logging setup for the zipspool binary

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use zipspool_core::{LogConfig, LogRotation};

const LOG_FILE: &str = "zipspool.log";

/// Console logging for short-lived commands. Stdout stays free for output.
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::builder().with_default_directive(tracing::Level::WARN.into()).from_env_lossy())
    .with_writer(std::io::stderr)
    .init();
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging for `zipspool run` from the `[log]` table.
///
/// Without a directory, logs go to stderr (stdout may carry events). With a
/// directory, logs go to a rolling file only.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_run_logging(config: &LogConfig) -> Option<WorkerGuard> {
  let level = parse_log_level(&config.level);

  // RUST_LOG still wins over the configured level
  let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  let Some(log_dir) = &config.directory else {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_writer(std::io::stderr)
      .init();
    return None;
  };

  if let Err(e) = std::fs::create_dir_all(log_dir) {
    eprintln!("Cannot create log directory {}: {}, logging to stderr", log_dir.display(), e);
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_writer(std::io::stderr)
      .init();
    return None;
  }

  let file_appender = match config.rotation {
    LogRotation::Hourly => tracing_appender::rolling::hourly(log_dir, LOG_FILE),
    LogRotation::Never => tracing_appender::rolling::never(log_dir, LOG_FILE),
    LogRotation::Daily => tracing_appender::rolling::daily(log_dir, LOG_FILE),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}

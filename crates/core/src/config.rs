//! Configuration for the spooling-directory source.
//!
//! A single TOML file holds a `[source]` table (the spooling behavior) and an
//! optional `[log]` table. Every key except `source.spool_dir` has a default.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Initial backoff after the sink refuses a batch; doubles up to `max_backoff_ms`.
pub const BASE_BACKOFF_MS: u64 = 250;

// ============================================================================
// Policies
// ============================================================================

/// What happens to a source file once it has been fully consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
  /// Rename the file with the completed suffix
  #[default]
  Never,
  /// Delete the file and its position record
  Immediate,
}

/// Which eligible file is opened next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsumeOrder {
  #[default]
  Oldest,
  Youngest,
  Random,
}

/// How the character decoder reacts to malformed input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
  /// Abort decoding with an error
  #[default]
  Fail,
  /// Substitute U+FFFD
  Replace,
  /// Drop the offending bytes
  Ignore,
}

macro_rules! impl_policy_from_str {
  ($ty:ty, $key:literal, { $($name:literal => $variant:expr),+ $(,)? }) => {
    impl FromStr for $ty {
      type Err = ConfigError;

      fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
          $($name => Ok($variant),)+
          other => Err(ConfigError::invalid($key, format!("unknown value '{}'", other))),
        }
      }
    }
  };
}

impl_policy_from_str!(DeletePolicy, "delete_policy", {
  "never" => DeletePolicy::Never,
  "immediate" => DeletePolicy::Immediate,
});

impl_policy_from_str!(ConsumeOrder, "consume_order", {
  "oldest" => ConsumeOrder::Oldest,
  "youngest" => ConsumeOrder::Youngest,
  "random" => ConsumeOrder::Random,
});

impl_policy_from_str!(DecodeErrorPolicy, "decode_error_policy", {
  "fail" => DecodeErrorPolicy::Fail,
  "replace" => DecodeErrorPolicy::Replace,
  "ignore" => DecodeErrorPolicy::Ignore,
});

// ============================================================================
// Source Configuration
// ============================================================================

/// Spooling-directory source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
  /// Directory watched for container files (required)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub spool_dir: Option<PathBuf>,

  /// Suffix appended to fully consumed files (default: ".COMPLETED")
  pub completed_suffix: String,

  /// Retention applied after consumption (default: never)
  pub delete_policy: DeletePolicy,

  /// Files whose name matches this regex are never opened (default: "^$")
  pub ignore_pattern: String,

  /// Position record directory, relative to the spool directory unless absolute
  /// (default: ".flumespool")
  pub tracker_dir: PathBuf,

  /// Add the absolute file path as a header (default: false)
  pub file_header: bool,

  /// Header key for the file path (default: "file")
  pub file_header_key: String,

  /// Add the file name as a header (default: false)
  pub basename_header: bool,

  /// Header key for the file name (default: "basename")
  pub basename_header_key: String,

  /// Events per batch handed to the sink (default: 100)
  pub batch_size: usize,

  /// Charset label of the archived payload (default: "UTF-8")
  pub input_charset: String,

  /// Decoder behavior on malformed input (default: fail)
  pub decode_error_policy: DecodeErrorPolicy,

  /// Selection order among eligible files (default: oldest)
  pub consume_order: ConsumeOrder,

  /// Upper bound for the sink backoff in milliseconds (default: 4000)
  pub max_backoff_ms: u64,

  /// Delay between poll cycles in milliseconds (default: 500)
  pub poll_delay_ms: u64,

  /// Hard per-event body ceiling in bytes (default: 100000000)
  pub max_event_length: usize,

  /// Largest accepted container file in bytes (default: 16 MiB)
  pub max_container_bytes: u64,

  /// Largest accepted decompressed entry in bytes (default: 64 MiB)
  pub max_entry_bytes: u64,

  /// Graceful drain window on stop, in seconds (default: 10)
  pub shutdown_timeout_secs: u64,
}

impl Default for SpoolConfig {
  fn default() -> Self {
    Self {
      spool_dir: None,
      completed_suffix: ".COMPLETED".to_string(),
      delete_policy: DeletePolicy::Never,
      ignore_pattern: "^$".to_string(),
      tracker_dir: PathBuf::from(".flumespool"),
      file_header: false,
      file_header_key: "file".to_string(),
      basename_header: false,
      basename_header_key: "basename".to_string(),
      batch_size: 100,
      input_charset: "UTF-8".to_string(),
      decode_error_policy: DecodeErrorPolicy::Fail,
      consume_order: ConsumeOrder::Oldest,
      max_backoff_ms: 4000,
      poll_delay_ms: 500,
      max_event_length: 100 * 1000 * 1000,
      max_container_bytes: 16 * 1024 * 1024,
      max_entry_bytes: 64 * 1024 * 1024,
      shutdown_timeout_secs: 10,
    }
  }
}

impl SpoolConfig {
  /// Defaults for the given spool directory
  pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
    Self {
      spool_dir: Some(spool_dir.into()),
      ..Default::default()
    }
  }

  /// Check every option once; the rest of the system trusts a validated config.
  pub fn validate(&self) -> Result<()> {
    match &self.spool_dir {
      None => return Err(ConfigError::MissingSpoolDir),
      Some(dir) if dir.as_os_str().is_empty() => return Err(ConfigError::MissingSpoolDir),
      Some(_) => {}
    }
    if self.completed_suffix.is_empty() {
      return Err(ConfigError::invalid("completed_suffix", "must not be empty"));
    }
    if self.batch_size == 0 {
      return Err(ConfigError::invalid("batch_size", "must be greater than zero"));
    }
    if self.max_event_length == 0 {
      return Err(ConfigError::invalid("max_event_length", "must be greater than zero"));
    }
    if self.max_container_bytes == 0 {
      return Err(ConfigError::invalid("max_container_bytes", "must be greater than zero"));
    }
    if self.max_entry_bytes == 0 {
      return Err(ConfigError::invalid("max_entry_bytes", "must be greater than zero"));
    }
    if self.max_backoff_ms < BASE_BACKOFF_MS {
      return Err(ConfigError::invalid(
        "max_backoff_ms",
        format!("must be at least {}", BASE_BACKOFF_MS),
      ));
    }
    if self.annotates_both() && self.file_header_key == self.basename_header_key {
      return Err(ConfigError::invalid(
        "basename_header_key",
        "must differ from file_header_key",
      ));
    }
    self.encoding()?;
    Ok(())
  }

  /// Resolve the configured charset label
  pub fn encoding(&self) -> Result<&'static encoding_rs::Encoding> {
    encoding_rs::Encoding::for_label(self.input_charset.trim().as_bytes())
      .ok_or_else(|| ConfigError::UnknownCharset(self.input_charset.clone()))
  }

  /// Tracker directory with relative paths resolved against the spool directory
  pub fn resolved_tracker_dir(&self) -> Option<PathBuf> {
    if self.tracker_dir.is_absolute() {
      return Some(self.tracker_dir.clone());
    }
    self.spool_dir.as_ref().map(|dir| dir.join(&self.tracker_dir))
  }

  pub fn poll_delay(&self) -> Duration {
    Duration::from_millis(self.poll_delay_ms)
  }

  pub fn max_backoff(&self) -> Duration {
    Duration::from_millis(self.max_backoff_ms)
  }

  pub fn shutdown_timeout(&self) -> Duration {
    Duration::from_secs(self.shutdown_timeout_secs)
  }

  fn annotates_both(&self) -> bool {
    self.file_header && self.basename_header
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log file rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
  #[default]
  Daily,
  Hourly,
  Never,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default level, overridable with RUST_LOG (default: "info")
  pub level: String,

  /// Rotation of the log file when `directory` is set (default: daily)
  pub rotation: LogRotation,

  /// Write logs to files in this directory instead of stderr
  #[serde(skip_serializing_if = "Option::is_none")]
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: LogRotation::Daily,
      directory: None,
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// zipspool configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Spooling source settings
  pub source: SpoolConfig,

  /// Logging settings
  pub log: LogConfig,
}

impl Config {
  /// Load and validate a configuration file
  pub fn load(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.source.validate()?;
    Ok(config)
  }

  /// Generate a commented default config file as a string
  pub fn generate_template(spool_dir: &str) -> String {
    format!(
      r#"# zipspool configuration

# ============================================================================
# Spooling Source
# ============================================================================

[source]
# Directory watched for single-entry zip files (required)
spool_dir = "{spool_dir}"

# Suffix appended to consumed files when delete_policy = "never"
completed_suffix = ".COMPLETED"

# Retention after consumption: never (rename) or immediate (delete)
delete_policy = "never"

# Regex of file names to leave untouched
ignore_pattern = "^$"

# Position records, relative to spool_dir unless absolute
tracker_dir = ".flumespool"

# Event headers
file_header = false
file_header_key = "file"
basename_header = false
basename_header_key = "basename"

# Events per batch
batch_size = 100

# Payload charset and decoder behavior: fail, replace, or ignore
input_charset = "UTF-8"
decode_error_policy = "fail"

# File selection: oldest, youngest, or random
consume_order = "oldest"

# Timing (milliseconds)
max_backoff_ms = 4000
poll_delay_ms = 500

# Size limits (bytes)
max_event_length = 100000000
max_container_bytes = 16777216  # 16MiB
max_entry_bytes = 67108864      # 64MiB

# Graceful shutdown window (seconds)
shutdown_timeout_secs = 10

# ============================================================================
# Logging
# ============================================================================

[log]
# error, warn, info, debug, trace (RUST_LOG overrides)
level = "info"

# File rotation when a directory is set: daily, hourly, never
rotation = "daily"

# directory = "/var/log/zipspool"
"#
    )
  }
}

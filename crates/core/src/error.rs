use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Configuration must specify a spooling directory")]
  MissingSpoolDir,

  #[error("Invalid value for {key}: {reason}")]
  Invalid { key: &'static str, reason: String },

  #[error("Unsupported input charset: {0}")]
  UnknownCharset(String),

  #[error("Failed to read config {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

impl ConfigError {
  pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
    Self::Invalid {
      key,
      reason: reason.into(),
    }
  }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub mod config;
pub mod error;
pub mod event;

pub use config::{
  BASE_BACKOFF_MS, Config, ConsumeOrder, DecodeErrorPolicy, DeletePolicy, LogConfig, LogRotation, SpoolConfig,
};
pub use error::{ConfigError, Result};
pub use event::Event;

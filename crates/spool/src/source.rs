//! Host lifecycle and the poll-commit loop.
//!
//! ```text
//! SpoolDirectorySource ──start──► tokio task: PollLoop
//!        │                          loop {
//!        │                            read_events ─► sink.accept ─► commit
//!        │                            (backpressure: sleep backoff, end cycle)
//!        │                            sleep poll_delay
//!        └──stop──► cancel ─────────► }
//! ```
//!
//! Reader calls touch the filesystem and run on the blocking pool. An error
//! or a panic anywhere in the loop sets the fatal flag and ends the task.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zipspool_core::{BASE_BACKOFF_MS, ConfigError, SpoolConfig};

use crate::counter::{CounterSnapshot, SourceCounter};
use crate::reader::{ReaderError, SpoolingReader};
use crate::sink::{EventSink, SinkError};

#[derive(Error, Debug)]
pub enum SourceError {
  #[error("Source has not been configured")]
  NotConfigured,

  #[error("Source is already running")]
  AlreadyRunning,

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Reader(#[from] ReaderError),

  #[error(transparent)]
  Sink(#[from] SinkError),

  #[error("Poll loop panicked: {0}")]
  Panicked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Idle,
  Started,
  Stopped,
}

#[derive(Debug, Default)]
struct SharedState {
  counter: SourceCounter,
  fatal: AtomicBool,
  backpressure: AtomicBool,
}

/// Spooling-directory source: owns the configuration, the poll task and the
/// flags the host inspects.
pub struct SpoolDirectorySource {
  sink: Arc<dyn EventSink>,
  config: Option<SpoolConfig>,
  state: LifecycleState,
  shared: Arc<SharedState>,
  cancel: CancellationToken,
  task: Option<JoinHandle<()>>,
  backoff: bool,
}

impl SpoolDirectorySource {
  pub fn new(sink: Arc<dyn EventSink>) -> Self {
    Self {
      sink,
      config: None,
      state: LifecycleState::Idle,
      shared: Arc::new(SharedState::default()),
      cancel: CancellationToken::new(),
      task: None,
      backoff: true,
    }
  }

  /// Validate and store `config`. Allowed whenever the source is not running.
  pub fn configure(&mut self, config: SpoolConfig) -> Result<(), SourceError> {
    if self.state == LifecycleState::Started {
      return Err(SourceError::AlreadyRunning);
    }
    config.validate()?;
    debug!(spool_dir = ?config.spool_dir, batch_size = config.batch_size, "Source configured");
    self.config = Some(config);
    Ok(())
  }

  pub fn config(&self) -> Option<&SpoolConfig> {
    self.config.as_ref()
  }

  /// Build the reader and spawn the poll task. Must run inside a tokio runtime.
  pub fn start(&mut self) -> Result<(), SourceError> {
    if self.state == LifecycleState::Started {
      return Err(SourceError::AlreadyRunning);
    }
    let config = self.config.as_ref().ok_or(SourceError::NotConfigured)?;
    let reader = SpoolingReader::new(config)?;

    self.shared = Arc::new(SharedState::default());
    self.cancel = CancellationToken::new();

    let poll = PollLoop {
      reader: Some(reader),
      sink: Arc::clone(&self.sink),
      shared: Arc::clone(&self.shared),
      cancel: self.cancel.clone(),
      batch_size: config.batch_size,
      poll_delay: config.poll_delay(),
      max_backoff: config.max_backoff(),
      backoff: self.backoff,
    };
    self.task = Some(tokio::spawn(poll.run()));
    self.state = LifecycleState::Started;

    info!(spool_dir = ?config.spool_dir, "Spooling directory source started");
    Ok(())
  }

  /// Cancel the poll task and wait up to the shutdown timeout for it to
  /// finish; abort it after that.
  pub async fn stop(&mut self) {
    self.cancel.cancel();

    if let Some(mut task) = self.task.take() {
      let timeout = self
        .config
        .as_ref()
        .map(SpoolConfig::shutdown_timeout)
        .unwrap_or(Duration::from_secs(10));

      match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(())) => debug!("Poll task finished"),
        Ok(Err(e)) => {
          error!(error = %e, "Poll task died");
          self.shared.fatal.store(true, Ordering::SeqCst);
        }
        Err(_) => {
          warn!(timeout_secs = timeout.as_secs(), "Poll task did not stop in time, aborting");
          task.abort();
        }
      }
    }

    if self.state == LifecycleState::Started {
      let counters = self.counters();
      info!(
        events_received = counters.events_received,
        events_accepted = counters.events_accepted,
        "Spooling directory source stopped"
      );
    }
    self.state = LifecycleState::Stopped;
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// True while the poll task is alive
  pub fn is_running(&self) -> bool {
    self.task.as_ref().is_some_and(|task| !task.is_finished())
  }

  /// The poll loop hit an unrecoverable error and terminated
  pub fn has_fatal_error(&self) -> bool {
    self.shared.fatal.load(Ordering::SeqCst)
  }

  /// The sink refused at least one batch
  pub fn hit_backpressure(&self) -> bool {
    self.shared.backpressure.load(Ordering::SeqCst)
  }

  /// Enable or disable sleeping after backpressure; applies from the next start
  pub fn set_backoff(&mut self, enabled: bool) {
    self.backoff = enabled;
  }

  pub fn counters(&self) -> CounterSnapshot {
    self.shared.counter.snapshot()
  }
}

impl Drop for SpoolDirectorySource {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

struct PollLoop {
  /// Lent to the blocking pool for every reader call
  reader: Option<SpoolingReader>,
  sink: Arc<dyn EventSink>,
  shared: Arc<SharedState>,
  cancel: CancellationToken,
  batch_size: usize,
  poll_delay: Duration,
  max_backoff: Duration,
  backoff: bool,
}

impl PollLoop {
  async fn run(mut self) {
    let base = Duration::from_millis(BASE_BACKOFF_MS);
    let mut backoff = base;
    debug!(poll_delay_ms = self.poll_delay.as_millis() as u64, "Poll loop started");

    loop {
      let outcome = match AssertUnwindSafe(self.cycle(base, &mut backoff)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(SourceError::Panicked(panic_message(payload.as_ref()))),
      };
      if let Err(e) = outcome {
        error!(error = %e, "Unrecoverable error, spooling source stops polling");
        self.shared.fatal.store(true, Ordering::SeqCst);
        break;
      }

      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => break,
        _ = tokio::time::sleep(self.poll_delay) => {}
      }
    }

    if let Some(mut reader) = self.reader.take() {
      if let Err(e) = reader.close() {
        warn!(error = %e, "Failed to close spooling reader");
      }
      debug!(truncated_events = reader.truncated_events(), "Poll loop stopped");
    }
  }

  /// Run `op` against the reader on the blocking pool
  async fn with_reader<T, F>(&mut self, op: F) -> Result<T, SourceError>
  where
    F: FnOnce(&mut SpoolingReader) -> Result<T, ReaderError> + Send + 'static,
    T: Send + 'static,
  {
    let Some(mut reader) = self.reader.take() else {
      return Err(SourceError::Panicked("spooling reader lost in an earlier call".into()));
    };
    let joined = tokio::task::spawn_blocking(move || {
      let result = op(&mut reader);
      (reader, result)
    })
    .await;

    match joined {
      Ok((reader, result)) => {
        self.reader = Some(reader);
        Ok(result?)
      }
      Err(e) if e.is_panic() => Err(SourceError::Panicked(panic_message(e.into_panic().as_ref()))),
      Err(e) => Err(SourceError::Panicked(e.to_string())),
    }
  }

  /// Deliver batches until the directory runs dry, the sink pushes back or
  /// the loop is cancelled.
  async fn cycle(&mut self, base: Duration, backoff: &mut Duration) -> Result<(), SourceError> {
    while !self.cancel.is_cancelled() {
      let batch_size = self.batch_size;
      let events = self.with_reader(move |reader| reader.read_events(batch_size)).await?;
      if events.is_empty() {
        return Ok(());
      }
      self.shared.counter.batch_received(events.len());

      match self.sink.accept(&events).await {
        Ok(()) => {
          self.with_reader(|reader| reader.commit()).await?;
          self.shared.counter.batch_accepted(events.len());
          *backoff = base;
        }
        Err(SinkError::Backpressure(reason)) => {
          self.shared.backpressure.store(true, Ordering::SeqCst);
          self.shared.counter.batch_rejected();
          warn!(
            reason = %reason,
            backoff_ms = backoff.as_millis() as u64,
            "Sink refused batch, will retry"
          );
          if self.backoff {
            tokio::select! {
              biased;
              _ = self.cancel.cancelled() => return Ok(()),
              _ = tokio::time::sleep(*backoff) => {}
            }
            *backoff = (*backoff * 2).min(self.max_backoff);
          }
          return Ok(());
        }
        Err(e @ SinkError::Fatal(_)) => return Err(e.into()),
      }
    }
    Ok(())
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".into()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use tempfile::TempDir;
  use zipspool_core::Event;

  struct NullSink;

  #[async_trait]
  impl EventSink for NullSink {
    async fn accept(&self, _events: &[Event]) -> Result<(), SinkError> {
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_start_requires_configuration() {
    let mut source = SpoolDirectorySource::new(Arc::new(NullSink));
    assert!(matches!(source.start(), Err(SourceError::NotConfigured)));
    assert_eq!(source.state(), LifecycleState::Idle);
  }

  #[tokio::test]
  async fn test_configure_rejects_invalid_config() {
    let mut source = SpoolDirectorySource::new(Arc::new(NullSink));
    let mut config = SpoolConfig::new("/tmp/spool");
    config.batch_size = 0;
    assert!(matches!(source.configure(config), Err(SourceError::Config(_))));
    assert!(source.config().is_none());
  }

  #[tokio::test]
  async fn test_start_stop_lifecycle() {
    let dir = TempDir::new().unwrap();
    let mut source = SpoolDirectorySource::new(Arc::new(NullSink));
    source.configure(SpoolConfig::new(dir.path())).unwrap();

    source.start().unwrap();
    assert_eq!(source.state(), LifecycleState::Started);
    assert!(matches!(source.start(), Err(SourceError::AlreadyRunning)));
    assert!(matches!(
      source.configure(SpoolConfig::new(dir.path())),
      Err(SourceError::AlreadyRunning)
    ));

    source.stop().await;
    assert_eq!(source.state(), LifecycleState::Stopped);
    assert!(!source.is_running());
    assert!(!source.has_fatal_error());

    // Reconfigure and restart after stop
    source.configure(SpoolConfig::new(dir.path())).unwrap();
    source.start().unwrap();
    source.stop().await;
  }

  #[test]
  fn test_panic_message_from_payload() {
    let payload: Box<dyn Any + Send> = Box::new("boom");
    assert_eq!(panic_message(payload.as_ref()), "boom");

    let payload: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
    assert_eq!(panic_message(payload.as_ref()), "code 7");

    let payload: Box<dyn Any + Send> = Box::new(7u8);
    assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
  }

  #[tokio::test]
  async fn test_start_fails_on_missing_spool_dir() {
    let dir = TempDir::new().unwrap();
    let mut source = SpoolDirectorySource::new(Arc::new(NullSink));
    source.configure(SpoolConfig::new(dir.path().join("missing"))).unwrap();
    assert!(matches!(
      source.start(),
      Err(SourceError::Reader(ReaderError::SpoolDirectory { .. }))
    ));
  }
}

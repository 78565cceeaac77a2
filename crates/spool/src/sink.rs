//! Downstream contract for delivered batches.

use async_trait::async_trait;
use thiserror::Error;
use zipspool_core::Event;

#[derive(Error, Debug)]
pub enum SinkError {
  /// The sink cannot take the batch right now; it will be offered again
  #[error("Sink is full: {0}")]
  Backpressure(String),

  /// The sink is broken; the source stops polling
  #[error("Sink failed: {0}")]
  Fatal(String),
}

/// Receiver of event batches.
///
/// A batch is committed only after `accept` returns `Ok`. On any error the
/// same events may be offered again, so delivery is at-least-once.
///
/// # Example
///
/// ```ignore
/// struct Discard;
///
/// #[async_trait::async_trait]
/// impl EventSink for Discard {
///     async fn accept(&self, _events: &[Event]) -> Result<(), SinkError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventSink: Send + Sync {
  async fn accept(&self, events: &[Event]) -> Result<(), SinkError>;
}

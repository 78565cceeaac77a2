use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Event and batch counters shared between the poll task and the host
#[derive(Debug, Default)]
pub struct SourceCounter {
  events_received: AtomicU64,
  events_accepted: AtomicU64,
  batches_received: AtomicU64,
  batches_accepted: AtomicU64,
  batches_rejected: AtomicU64,
}

/// Point-in-time copy of [`SourceCounter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
  pub events_received: u64,
  pub events_accepted: u64,
  pub batches_received: u64,
  pub batches_accepted: u64,
  /// Batches the sink pushed back on
  pub batches_rejected: u64,
}

impl SourceCounter {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn batch_received(&self, events: usize) {
    self.batches_received.fetch_add(1, Ordering::Relaxed);
    self.events_received.fetch_add(events as u64, Ordering::Relaxed);
  }

  pub(crate) fn batch_accepted(&self, events: usize) {
    self.batches_accepted.fetch_add(1, Ordering::Relaxed);
    self.events_accepted.fetch_add(events as u64, Ordering::Relaxed);
  }

  pub(crate) fn batch_rejected(&self) {
    self.batches_rejected.fetch_add(1, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> CounterSnapshot {
    CounterSnapshot {
      events_received: self.events_received.load(Ordering::Relaxed),
      events_accepted: self.events_accepted.load(Ordering::Relaxed),
      batches_received: self.batches_received.load(Ordering::Relaxed),
      batches_accepted: self.batches_accepted.load(Ordering::Relaxed),
      batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
    }
  }
}

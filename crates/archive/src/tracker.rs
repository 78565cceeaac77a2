use std::io;

/// Durable key→offset store for a single source file.
///
/// The stream reads the position on open and reset; the owner of the stream
/// writes it on commit through [`crate::ArchiveStream::mark`].
pub trait PositionTracker: Send {
  /// Identity of the file this tracker belongs to
  fn target(&self) -> &str;

  /// Last stored position, 0 when nothing was committed yet
  fn position(&self) -> u64;

  fn store_position(&mut self, position: u64) -> io::Result<()>;

  fn close(&mut self) -> io::Result<()>;
}

/// Non-durable tracker, for callers that do not need resumption across restarts
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
  target: String,
  position: u64,
  closed: bool,
}

impl MemoryTracker {
  pub fn new(target: impl Into<String>) -> Self {
    Self {
      target: target.into(),
      position: 0,
      closed: false,
    }
  }

  pub fn at(target: impl Into<String>, position: u64) -> Self {
    Self {
      position,
      ..Self::new(target)
    }
  }

  pub fn is_closed(&self) -> bool {
    self.closed
  }
}

impl PositionTracker for MemoryTracker {
  fn target(&self) -> &str {
    &self.target
  }

  fn position(&self) -> u64 {
    self.position
  }

  fn store_position(&mut self, position: u64) -> io::Result<()> {
    if self.closed {
      return Err(io::Error::other("tracker is closed"));
    }
    self.position = position;
    Ok(())
  }

  fn close(&mut self) -> io::Result<()> {
    self.closed = true;
    Ok(())
  }
}

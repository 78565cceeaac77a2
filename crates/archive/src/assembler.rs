use tracing::warn;
use zipspool_core::{ConfigError, Event};

use crate::stream::ArchiveStream;

const CHUNK_SIZE: usize = 8 * 1024;

/// Cuts the raw bytes of a stream into events of at most `max_event_length`
/// bytes. No delimiter handling: an event is simply the next run of bytes.
#[derive(Debug)]
pub struct EventAssembler {
  max_event_length: usize,
  truncated: u64,
}

impl EventAssembler {
  pub fn new(max_event_length: usize) -> Result<Self, ConfigError> {
    if max_event_length == 0 {
      return Err(ConfigError::Invalid {
        key: "max_event_length",
        reason: "must be greater than 0".into(),
      });
    }
    Ok(Self {
      max_event_length,
      truncated: 0,
    })
  }

  pub fn max_event_length(&self) -> usize {
    self.max_event_length
  }

  /// Events that hit the length limit so far
  pub fn truncated_events(&self) -> u64 {
    self.truncated
  }

  /// Next event, or `None` once the stream is exhausted
  pub fn next_event(&mut self, stream: &mut ArchiveStream) -> Option<Event> {
    let mut body = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];

    while body.len() < self.max_event_length {
      let want = CHUNK_SIZE.min(self.max_event_length - body.len());
      let n = stream.read(&mut chunk[..want]);
      if n == 0 {
        break;
      }
      body.extend_from_slice(&chunk[..n]);
    }

    if body.is_empty() {
      return None;
    }

    if body.len() >= self.max_event_length {
      self.truncated += 1;
      warn!(
        path = %stream.path().display(),
        max_event_length = self.max_event_length,
        "Event reached maximum length, splitting remainder into the next event"
      );
    }

    Some(Event::with_body(body))
  }

  /// Up to `n` events; fewer only when the stream runs out
  pub fn read_events(&mut self, stream: &mut ArchiveStream, n: usize) -> Vec<Event> {
    let mut events = Vec::with_capacity(n.min(1024));
    while events.len() < n {
      match self.next_event(stream) {
        Some(event) => events.push(event),
        None => break,
      }
    }
    events
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stream::StreamOptions;
  use crate::test_support::write_zip;
  use crate::tracker::MemoryTracker;
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  fn stream_over(dir: &TempDir, content: &[u8]) -> ArchiveStream {
    let path = write_zip(&dir.path().join("events.zip"), &[("file1", content)]);
    ArchiveStream::open(&path, Box::new(MemoryTracker::new("events")), StreamOptions::default()).unwrap()
  }

  fn body(event: &Event) -> &str {
    std::str::from_utf8(&event.body).unwrap()
  }

  #[test]
  fn test_zero_max_length_rejected() {
    assert!(matches!(
      EventAssembler::new(0),
      Err(ConfigError::Invalid {
        key: "max_event_length",
        ..
      })
    ));
  }

  #[test]
  fn test_whole_entry_is_one_event() {
    let dir = TempDir::new().unwrap();
    let mut stream = stream_over(&dir, b"file1line1\nfile1line2\n");
    let mut assembler = EventAssembler::new(100).unwrap();

    let event = assembler.next_event(&mut stream).unwrap();
    assert_eq!(body(&event), "file1line1\nfile1line2\n");
    assert!(event.headers.is_empty());
    assert!(assembler.next_event(&mut stream).is_none());
    assert_eq!(assembler.truncated_events(), 0);
  }

  #[test]
  fn test_long_content_split_at_max_length() {
    let dir = TempDir::new().unwrap();
    let mut stream = stream_over(&dir, b"file1line1\nfile1line2\nfile1line3\n");
    let mut assembler = EventAssembler::new(10).unwrap();

    let events = assembler.read_events(&mut stream, 10);
    let bodies: Vec<&str> = events.iter().map(body).collect();
    assert_eq!(bodies, vec!["file1line1", "\nfile1line", "2\nfile1lin", "e3\n"]);
    assert_eq!(assembler.truncated_events(), 3);
    assert!(assembler.next_event(&mut stream).is_none());
  }

  #[test]
  fn test_exact_fit_still_counts_as_truncated() {
    let dir = TempDir::new().unwrap();
    let mut stream = stream_over(&dir, b"0123456789");
    let mut assembler = EventAssembler::new(10).unwrap();
    assert_eq!(body(&assembler.next_event(&mut stream).unwrap()), "0123456789");
    assert_eq!(assembler.truncated_events(), 1);
    assert!(assembler.next_event(&mut stream).is_none());
  }

  #[test]
  fn test_empty_entry_yields_nothing() {
    let dir = TempDir::new().unwrap();
    let mut stream = stream_over(&dir, b"");
    let mut assembler = EventAssembler::new(10).unwrap();
    assert!(assembler.next_event(&mut stream).is_none());
    assert!(assembler.read_events(&mut stream, 5).is_empty());
  }

  #[test]
  fn test_read_events_respects_batch_size() {
    let dir = TempDir::new().unwrap();
    let mut stream = stream_over(&dir, &[b'a'; 25]);
    let mut assembler = EventAssembler::new(5).unwrap();
    assert_eq!(assembler.read_events(&mut stream, 2).len(), 2);
    assert_eq!(stream.tell(), 10);
    assert_eq!(assembler.read_events(&mut stream, 10).len(), 3);
  }

  #[test]
  fn test_large_event_spans_chunks() {
    let dir = TempDir::new().unwrap();
    let content: Vec<u8> = (0..20_000u32).map(|i| b'a' + (i % 26) as u8).collect();
    let mut stream = stream_over(&dir, &content);
    let mut assembler = EventAssembler::new(100_000).unwrap();
    let event = assembler.next_event(&mut stream).unwrap();
    assert_eq!(event.body, content);
  }
}

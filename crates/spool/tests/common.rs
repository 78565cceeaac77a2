//! Common test utilities for spool integration tests

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use archive::test_support::write_zip;
use async_trait::async_trait;
use filetime::{FileTime, set_file_mtime};
use spool::{EventSink, SinkError};
use zipspool_core::{Event, SpoolConfig};

/// Write a zip with a single entry named after the file
#[allow(dead_code)]
pub fn write_single(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
  write_entries(dir, name, &[("payload.txt", content)])
}

#[allow(dead_code)]
pub fn write_entries(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
  write_zip(&dir.join(name), entries)
}

#[allow(dead_code)]
pub fn set_mtime(path: &Path, secs: i64) {
  set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
}

/// Config with a short poll delay for loop tests
#[allow(dead_code)]
pub fn fast_config(dir: &Path) -> SpoolConfig {
  let mut config = SpoolConfig::new(dir);
  config.poll_delay_ms = 10;
  config.shutdown_timeout_secs = 2;
  config
}

#[allow(dead_code)]
pub fn bodies(events: &[Event]) -> Vec<String> {
  events.iter().map(|e| e.body_lossy().to_string()).collect()
}

/// Names of the entries in `dir`, sorted, hidden ones excluded
#[allow(dead_code)]
pub fn listing(dir: &Path) -> Vec<String> {
  let mut names: Vec<String> = std::fs::read_dir(dir)
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
    .filter(|name| !name.starts_with('.'))
    .collect();
  names.sort();
  names
}

/// Poll `condition` every 10ms for up to 5s
#[allow(dead_code)]
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
  for _ in 0..500 {
    if condition() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  condition()
}

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum Reply {
  Accept,
  Backpressure,
  Fatal,
}

/// Sink that records every offered batch and answers from a script,
/// accepting once the script runs out
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingSink {
  offered: Mutex<Vec<Vec<Event>>>,
  accepted: Mutex<Vec<Event>>,
  script: Mutex<VecDeque<Reply>>,
}

#[allow(dead_code)]
impl RecordingSink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn scripted(replies: impl IntoIterator<Item = Reply>) -> Self {
    Self {
      script: Mutex::new(replies.into_iter().collect()),
      ..Self::default()
    }
  }

  pub fn offered(&self) -> Vec<Vec<Event>> {
    self.offered.lock().unwrap().clone()
  }

  pub fn accepted(&self) -> Vec<Event> {
    self.accepted.lock().unwrap().clone()
  }
}

#[async_trait]
impl EventSink for RecordingSink {
  async fn accept(&self, events: &[Event]) -> Result<(), SinkError> {
    self.offered.lock().unwrap().push(events.to_vec());
    let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Accept);
    match reply {
      Reply::Accept => {
        self.accepted.lock().unwrap().extend_from_slice(events);
        Ok(())
      }
      Reply::Backpressure => Err(SinkError::Backpressure("channel full".into())),
      Reply::Fatal => Err(SinkError::Fatal("channel closed".into())),
    }
  }
}

//! Durable position records, one JSON file per source file.
//!
//! ```text
//! <tracker_dir>/
//!   a.zip.meta   {"target":"/spool/a.zip","stamp":{"len":812,"modified_ms":1700000000000},"position":4096}
//!   b.zip.meta
//! ```
//!
//! Records are replaced atomically (write `.tmp`, fsync, rename) so a crash
//! leaves either the previous or the new position, never a torn file. A record
//! is only written on the first stored position, and it only applies to the
//! file whose size and modification time it carries.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use archive::PositionTracker;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

const META_EXTENSION: &str = "meta";
const PROBE_FILE: &str = ".write-probe";

#[derive(Error, Debug)]
pub enum TrackerError {
  #[error("Tracker I/O failed on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("Corrupt position record {path}: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("Position record {path} belongs to {found}, expected {expected}")]
  TargetMismatch {
    path: PathBuf,
    expected: String,
    found: String,
  },

  #[error("Position record {path} was written for an earlier file of the same name")]
  StaleRecord { path: PathBuf },

  #[error("Tracker directory {path} is not writable: {source}")]
  NotWritable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> TrackerError + '_ {
  move |source| TrackerError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Size and modification time of a source file, as seen when it was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
  pub len: u64,
  pub modified_ms: u64,
}

impl FileStamp {
  pub fn new(len: u64, modified: SystemTime) -> Self {
    let modified_ms = modified
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis() as u64)
      .unwrap_or(0);
    Self { len, modified_ms }
  }
}

/// Committed position of one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
  /// Absolute path of the source file
  pub target: String,
  /// Missing in a record means it cannot be matched to any file
  #[serde(default)]
  pub stamp: Option<FileStamp>,
  pub position: u64,
}

/// Position tracker backed by a record file
#[derive(Debug)]
pub struct DurablePositionTracker {
  meta_path: PathBuf,
  record: PositionRecord,
  closed: bool,
}

impl DurablePositionTracker {
  /// Load the record at `meta_path`. An absent record starts at position 0
  /// and is not written until the first `store_position`.
  pub fn open(
    meta_path: impl Into<PathBuf>,
    target: impl Into<String>,
    stamp: FileStamp,
  ) -> Result<Self, TrackerError> {
    let meta_path = meta_path.into();
    let target = target.into();

    match fs::read(&meta_path) {
      Ok(bytes) => {
        let record: PositionRecord = serde_json::from_slice(&bytes).map_err(|source| TrackerError::Corrupt {
          path: meta_path.clone(),
          source,
        })?;
        if record.target != target {
          return Err(TrackerError::TargetMismatch {
            path: meta_path,
            expected: target,
            found: record.target,
          });
        }
        if record.stamp != Some(stamp) {
          return Err(TrackerError::StaleRecord { path: meta_path });
        }
        debug!(path = %meta_path.display(), position = record.position, "Loaded position record");
        Ok(Self {
          meta_path,
          record,
          closed: false,
        })
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self {
        meta_path,
        record: PositionRecord {
          target,
          stamp: Some(stamp),
          position: 0,
        },
        closed: false,
      }),
      Err(e) => Err(TrackerError::Io { path: meta_path, source: e }),
    }
  }

  pub fn meta_path(&self) -> &Path {
    &self.meta_path
  }

  pub fn record(&self) -> &PositionRecord {
    &self.record
  }

  fn persist(&self) -> io::Result<()> {
    let tmp = self.meta_path.with_extension(format!("{}.tmp", META_EXTENSION));
    let json = serde_json::to_vec(&self.record).map_err(io::Error::other)?;
    {
      let mut file = File::create(&tmp)?;
      file.write_all(&json)?;
      file.sync_all()?;
    }
    fs::rename(&tmp, &self.meta_path)
  }
}

impl PositionTracker for DurablePositionTracker {
  fn target(&self) -> &str {
    &self.record.target
  }

  fn position(&self) -> u64 {
    self.record.position
  }

  fn store_position(&mut self, position: u64) -> io::Result<()> {
    if self.closed {
      return Err(io::Error::other(format!(
        "position record {} is closed",
        self.meta_path.display()
      )));
    }
    let previous = self.record.position;
    self.record.position = position;
    if let Err(e) = self.persist() {
      self.record.position = previous;
      return Err(e);
    }
    trace!(path = %self.meta_path.display(), position, "Stored position");
    Ok(())
  }

  fn close(&mut self) -> io::Result<()> {
    self.closed = true;
    Ok(())
  }
}

/// The directory holding every position record of one spool directory
#[derive(Debug, Clone)]
pub struct TrackerDirectory {
  dir: PathBuf,
}

impl TrackerDirectory {
  /// Create the directory if needed and check that it accepts writes.
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TrackerError> {
    let dir = dir.into();
    fs::create_dir_all(&dir).map_err(io_error(&dir))?;

    let probe = dir.join(PROBE_FILE);
    let probe_result = File::create(&probe).and_then(|mut f| f.write_all(b"probe"));
    let _ = fs::remove_file(&probe);
    probe_result.map_err(|source| TrackerError::NotWritable {
      path: dir.clone(),
      source,
    })?;

    debug!(path = %dir.display(), "Tracker directory ready");
    Ok(Self { dir })
  }

  pub fn path(&self) -> &Path {
    &self.dir
  }

  /// Record path for a source file: `<dir>/<file name>.meta`
  pub fn meta_path(&self, file: &Path) -> PathBuf {
    let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    self.dir.join(format!("{}.{}", name, META_EXTENSION))
  }

  /// Tracker for `file`. A record left behind by a different file of the
  /// same name, by an earlier file at the same path, or one that cannot be
  /// parsed, is discarded and restarted at 0.
  pub fn tracker_for(&self, file: &Path, stamp: FileStamp) -> Result<DurablePositionTracker, TrackerError> {
    let meta = self.meta_path(file);
    let target = file.to_string_lossy().to_string();

    match DurablePositionTracker::open(&meta, target.clone(), stamp) {
      Err(TrackerError::TargetMismatch { found, .. }) => {
        warn!(
          path = %meta.display(),
          expected = %target,
          found = %found,
          "Position record belongs to another file, starting over"
        );
      }
      Err(TrackerError::StaleRecord { .. }) => {
        warn!(path = %meta.display(), target = %target, "Position record predates this file, starting over");
      }
      Err(TrackerError::Corrupt { source, .. }) => {
        warn!(path = %meta.display(), error = %source, "Position record unreadable, starting over");
      }
      other => return other,
    }

    fs::remove_file(&meta).map_err(io_error(&meta))?;
    DurablePositionTracker::open(meta, target, stamp)
  }

  /// Delete the record of `file`, if any
  pub fn remove(&self, file: &Path) -> Result<(), TrackerError> {
    let meta = self.meta_path(file);
    match fs::remove_file(&meta) {
      Ok(()) => {
        debug!(path = %meta.display(), "Removed position record");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(TrackerError::Io { path: meta, source: e }),
    }
  }

  /// Every readable record in the directory
  pub fn records(&self) -> Result<Vec<PositionRecord>, TrackerError> {
    let mut records: Vec<PositionRecord> = Vec::new();
    for entry in fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
      let path = entry.map_err(io_error(&self.dir))?.path();
      if path.extension().and_then(|e| e.to_str()) != Some(META_EXTENSION) {
        continue;
      }
      let bytes = fs::read(&path).map_err(io_error(&path))?;
      match serde_json::from_slice(&bytes) {
        Ok(record) => records.push(record),
        Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable position record"),
      }
    }
    records.sort_by(|a, b| a.target.cmp(&b.target));
    Ok(records)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  const STAMP: FileStamp = FileStamp {
    len: 120,
    modified_ms: 1_000,
  };

  #[test]
  fn test_new_record_starts_at_zero() {
    let dir = TempDir::new().unwrap();
    let trackers = TrackerDirectory::open(dir.path().join(".flumespool")).unwrap();
    let tracker = trackers.tracker_for(Path::new("/spool/a.zip"), STAMP).unwrap();

    assert_eq!(tracker.position(), 0);
    assert_eq!(tracker.target(), "/spool/a.zip");
    assert_eq!(tracker.meta_path(), dir.path().join(".flumespool/a.zip.meta"));
  }

  #[test]
  fn test_record_written_on_first_store() {
    let dir = TempDir::new().unwrap();
    let trackers = TrackerDirectory::open(dir.path()).unwrap();
    let mut tracker = trackers.tracker_for(Path::new("/spool/a.zip"), STAMP).unwrap();
    assert!(!tracker.meta_path().exists());
    assert!(trackers.records().unwrap().is_empty());

    tracker.store_position(3).unwrap();
    assert!(tracker.meta_path().exists());
  }

  #[test]
  fn test_position_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let trackers = TrackerDirectory::open(dir.path()).unwrap();
    let file = Path::new("/spool/a.zip");

    let mut tracker = trackers.tracker_for(file, STAMP).unwrap();
    tracker.store_position(1234).unwrap();
    tracker.close().unwrap();

    let reopened = trackers.tracker_for(file, STAMP).unwrap();
    assert_eq!(reopened.position(), 1234);
    assert_eq!(
      trackers.records().unwrap(),
      vec![PositionRecord {
        target: "/spool/a.zip".into(),
        stamp: Some(STAMP),
        position: 1234,
      }]
    );
  }

  #[test]
  fn test_mismatched_target_rejected_by_tracker() {
    let dir = TempDir::new().unwrap();
    let meta = dir.path().join("a.zip.meta");
    let mut tracker = DurablePositionTracker::open(&meta, "/one/a.zip", STAMP).unwrap();
    tracker.store_position(10).unwrap();

    let err = DurablePositionTracker::open(&meta, "/two/a.zip", STAMP).unwrap_err();
    assert!(matches!(err, TrackerError::TargetMismatch { .. }));
  }

  #[test]
  fn test_directory_restarts_mismatched_record() {
    let dir = TempDir::new().unwrap();
    let trackers = TrackerDirectory::open(dir.path()).unwrap();
    let mut tracker = trackers.tracker_for(Path::new("/one/a.zip"), STAMP).unwrap();
    tracker.store_position(10).unwrap();

    let tracker = trackers.tracker_for(Path::new("/two/a.zip"), STAMP).unwrap();
    assert_eq!(tracker.position(), 0);
    assert_eq!(tracker.target(), "/two/a.zip");
  }

  #[test]
  fn test_record_of_earlier_file_at_same_path_restarts() {
    let dir = TempDir::new().unwrap();
    let trackers = TrackerDirectory::open(dir.path()).unwrap();
    let file = Path::new("/spool/a.zip");
    let mut tracker = trackers.tracker_for(file, STAMP).unwrap();
    tracker.store_position(4).unwrap();

    let newer = FileStamp {
      len: 90,
      modified_ms: 2_000,
    };
    let tracker = trackers.tracker_for(file, newer).unwrap();
    assert_eq!(tracker.position(), 0);
    assert_eq!(tracker.record().stamp, Some(newer));
    assert!(!tracker.meta_path().exists());
  }

  #[test]
  fn test_record_without_stamp_restarts() {
    let dir = TempDir::new().unwrap();
    let trackers = TrackerDirectory::open(dir.path()).unwrap();
    fs::write(
      dir.path().join("a.zip.meta"),
      r#"{"target":"/spool/a.zip","position":4}"#,
    )
    .unwrap();

    let tracker = trackers.tracker_for(Path::new("/spool/a.zip"), STAMP).unwrap();
    assert_eq!(tracker.position(), 0);
  }

  #[test]
  fn test_corrupt_record_restarts() {
    let dir = TempDir::new().unwrap();
    let trackers = TrackerDirectory::open(dir.path()).unwrap();
    fs::write(dir.path().join("a.zip.meta"), "{not json").unwrap();
    let tracker = trackers.tracker_for(Path::new("/spool/a.zip"), STAMP).unwrap();
    assert_eq!(tracker.position(), 0);
  }

  #[test]
  fn test_store_after_close_fails() {
    let dir = TempDir::new().unwrap();
    let mut tracker = DurablePositionTracker::open(dir.path().join("x.meta"), "/x", STAMP).unwrap();
    tracker.close().unwrap();
    assert!(tracker.store_position(5).is_err());
    assert_eq!(tracker.position(), 0);
  }

  #[test]
  fn test_remove_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let trackers = TrackerDirectory::open(dir.path()).unwrap();
    let file = Path::new("/spool/a.zip");
    trackers.tracker_for(file, STAMP).unwrap().store_position(1).unwrap();

    trackers.remove(file).unwrap();
    assert!(!trackers.meta_path(file).exists());
    trackers.remove(file).unwrap();
    assert!(trackers.records().unwrap().is_empty());
  }

  #[test]
  fn test_no_temp_files_left_behind() {
    let dir = TempDir::new().unwrap();
    let trackers = TrackerDirectory::open(dir.path()).unwrap();
    let mut tracker = trackers.tracker_for(Path::new("/spool/a.zip"), STAMP).unwrap();
    tracker.store_position(7).unwrap();

    let names: Vec<String> = fs::read_dir(dir.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
      .collect();
    assert_eq!(names, vec!["a.zip.meta".to_string()]);
  }
}

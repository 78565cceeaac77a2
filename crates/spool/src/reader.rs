//! The spooling-directory state machine.
//!
//! Files move through
//!
//! ```text
//! discovered ─┬─► ignored (hidden, completed suffix, ignore pattern)
//!             └─► eligible ──► open ──► exhausted ──► retired (rolled or deleted)
//!                               │
//!                               └─► failed (skipped until restart)
//! ```
//!
//! Only one file is open at a time. A batch handed out by `read_events` stays
//! outstanding until `commit`; if the next read arrives first, the stream is
//! rewound to the last committed position and the same bytes are read again.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use archive::{ArchiveError, ArchiveStream, EventAssembler, StreamOptions};
use rand::Rng;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;
use zipspool_core::{ConfigError, ConsumeOrder, DeletePolicy, Event, SpoolConfig};

use crate::tracker::{FileStamp, TrackerDirectory, TrackerError};

#[derive(Error, Debug)]
pub enum ReaderError {
  #[error("Spool directory {path} is unusable: {reason}")]
  SpoolDirectory { path: PathBuf, reason: String },

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("Invalid ignore pattern: {0}")]
  IgnorePattern(#[from] regex::Error),

  #[error(transparent)]
  Tracker(#[from] TrackerError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error("Batch outstanding but no file is open")]
  CommitOutstanding,

  #[error("File {path} was modified after it was opened")]
  FileModified { path: PathBuf },

  #[error("File name {path} was reused: {completed} exists with different content")]
  NameReused { path: PathBuf, completed: PathBuf },

  #[error("Cannot stat {path}: {source}")]
  Stat {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl ReaderError {
  /// Errors that only condemn the file being opened
  fn is_per_file(&self) -> bool {
    match self {
      ReaderError::Archive(e) => e.is_per_file(),
      ReaderError::Stat { .. } => true,
      _ => false,
    }
  }
}

/// Identity of a source file as seen when it was opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
  path: PathBuf,
  modified: SystemTime,
  len: u64,
}

impl SourceFile {
  pub fn stat(path: &Path) -> io::Result<Self> {
    let meta = fs::metadata(path)?;
    Ok(Self {
      path: path.to_path_buf(),
      modified: meta.modified()?,
      len: meta.len(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn modified(&self) -> SystemTime {
    self.modified
  }

  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn stamp(&self) -> FileStamp {
    FileStamp::new(self.len, self.modified)
  }

  pub fn file_name(&self) -> String {
    self
      .path
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_default()
  }
}

struct OpenFile {
  file: SourceFile,
  stream: ArchiveStream,
  meta_path: PathBuf,
  basename: String,
}

struct Candidate {
  path: PathBuf,
  name: String,
  modified: SystemTime,
}

pub struct SpoolingReader {
  spool_dir: PathBuf,
  completed_suffix: String,
  delete_policy: DeletePolicy,
  consume_order: ConsumeOrder,
  ignore: Regex,
  file_header_key: Option<String>,
  basename_header_key: Option<String>,
  trackers: TrackerDirectory,
  options: StreamOptions,
  assembler: EventAssembler,
  current: Option<OpenFile>,
  committed: bool,
  failed: HashSet<PathBuf>,
}

impl std::fmt::Debug for SpoolingReader {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SpoolingReader")
      .field("spool_dir", &self.spool_dir)
      .field("current", &self.current_file())
      .field("committed", &self.committed)
      .field("failed", &self.failed)
      .finish()
  }
}

impl SpoolingReader {
  pub fn new(config: &SpoolConfig) -> Result<Self, ReaderError> {
    config.validate()?;

    let configured = config.spool_dir.clone().ok_or(ConfigError::MissingSpoolDir)?;
    let spool_dir = std::path::absolute(&configured).map_err(|e| ReaderError::SpoolDirectory {
      path: configured.clone(),
      reason: e.to_string(),
    })?;
    match fs::metadata(&spool_dir) {
      Ok(meta) if meta.is_dir() => {}
      Ok(_) => {
        return Err(ReaderError::SpoolDirectory {
          path: spool_dir,
          reason: "not a directory".into(),
        });
      }
      Err(e) => {
        return Err(ReaderError::SpoolDirectory {
          path: spool_dir,
          reason: e.to_string(),
        });
      }
    }

    let tracker_dir = if config.tracker_dir.is_absolute() {
      config.tracker_dir.clone()
    } else {
      spool_dir.join(&config.tracker_dir)
    };
    let trackers = TrackerDirectory::open(tracker_dir)?;

    // Whole-name match
    let ignore = Regex::new(&format!("^(?:{})$", config.ignore_pattern))?;

    info!(
      spool_dir = %spool_dir.display(),
      tracker_dir = %trackers.path().display(),
      order = ?config.consume_order,
      delete_policy = ?config.delete_policy,
      "Spooling reader ready"
    );

    Ok(Self {
      spool_dir,
      completed_suffix: config.completed_suffix.clone(),
      delete_policy: config.delete_policy,
      consume_order: config.consume_order,
      ignore,
      file_header_key: config.file_header.then(|| config.file_header_key.clone()),
      basename_header_key: config.basename_header.then(|| config.basename_header_key.clone()),
      trackers,
      options: StreamOptions::from_config(config)?,
      assembler: EventAssembler::new(config.max_event_length)?,
      current: None,
      committed: true,
      failed: HashSet::new(),
    })
  }

  pub fn spool_dir(&self) -> &Path {
    &self.spool_dir
  }

  pub fn trackers(&self) -> &TrackerDirectory {
    &self.trackers
  }

  pub fn current_file(&self) -> Option<&SourceFile> {
    self.current.as_ref().map(|open| &open.file)
  }

  /// Files skipped for the rest of this process
  pub fn failed_files(&self) -> &HashSet<PathBuf> {
    &self.failed
  }

  pub fn is_committed(&self) -> bool {
    self.committed
  }

  pub fn truncated_events(&self) -> u64 {
    self.assembler.truncated_events()
  }

  fn is_eligible(&self, name: &str) -> bool {
    !name.starts_with('.') && !name.ends_with(&self.completed_suffix) && !self.ignore.is_match(name)
  }

  /// Pick the next file to consume, without opening it.
  pub fn select_next_file(&self) -> Result<Option<PathBuf>, ReaderError> {
    let current = self.current.as_ref().map(|open| open.file.path());
    let mut candidates = Vec::new();

    for entry in WalkDir::new(&self.spool_dir).min_depth(1).max_depth(1) {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) if e.depth() == 0 => {
          return Err(ReaderError::SpoolDirectory {
            path: self.spool_dir.clone(),
            reason: e.to_string(),
          });
        }
        Err(e) => {
          warn!(error = %e, "Skipping unreadable spool entry");
          continue;
        }
      };

      if !entry.file_type().is_file() {
        continue;
      }
      let name = entry.file_name().to_string_lossy().to_string();
      if !self.is_eligible(&name) {
        trace!(file = %name, "Ignored");
        continue;
      }
      if self.failed.contains(entry.path()) || current == Some(entry.path()) {
        continue;
      }

      let modified = match entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) => {
          warn!(path = %entry.path().display(), error = %e, "Cannot read modification time, skipping");
          continue;
        }
      };
      candidates.push(Candidate {
        path: entry.into_path(),
        name,
        modified,
      });
    }

    let chosen = match self.consume_order {
      ConsumeOrder::Oldest => candidates
        .into_iter()
        .min_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name))),
      ConsumeOrder::Youngest => candidates
        .into_iter()
        .min_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name))),
      ConsumeOrder::Random if candidates.is_empty() => None,
      ConsumeOrder::Random => {
        let index = rand::rng().random_range(0..candidates.len());
        Some(candidates.swap_remove(index))
      }
    };

    Ok(chosen.map(|c| c.path))
  }

  /// Next batch of at most `n` events, all from the same file. Empty when no
  /// eligible file has anything left.
  pub fn read_events(&mut self, n: usize) -> Result<Vec<Event>, ReaderError> {
    if !self.committed {
      if self.current.is_none() {
        return Err(ReaderError::CommitOutstanding);
      }
      self.rewind_current()?;
      self.committed = true;
    }
    if self.current.is_none() {
      self.current = self.open_next_file()?;
    }

    loop {
      let Some(open) = self.current.as_mut() else {
        return Ok(Vec::new());
      };

      let mut events = self.assembler.read_events(&mut open.stream, n);
      if events.is_empty() {
        self.retire_current()?;
        self.current = self.open_next_file()?;
        continue;
      }

      for event in &mut events {
        if let Some(key) = &self.file_header_key {
          event.set_header(key.clone(), open.file.path().to_string_lossy());
        }
        if let Some(key) = &self.basename_header_key {
          event.set_header(key.clone(), open.basename.clone());
        }
      }

      debug!(
        path = %open.file.path().display(),
        events = events.len(),
        position = open.stream.tell(),
        "Read batch"
      );
      self.committed = false;
      return Ok(events);
    }
  }

  /// Persist the position after the outstanding batch
  pub fn commit(&mut self) -> Result<(), ReaderError> {
    if self.committed {
      return Ok(());
    }
    if let Some(open) = self.current.as_mut() {
      let position = open.stream.tell();
      open
        .stream
        .mark()
        .map_err(|e| tracker_failure(&open.meta_path, e))?;
      debug!(path = %open.file.path().display(), position, "Committed");
    }
    self.committed = true;
    Ok(())
  }

  /// Close the open file, if any. Uncommitted progress is dropped.
  pub fn close(&mut self) -> Result<(), ReaderError> {
    if let Some(mut open) = self.current.take() {
      open
        .stream
        .close()
        .map_err(|e| tracker_failure(&open.meta_path, e))?;
      debug!(path = %open.file.path().display(), "Closed spool file");
    }
    self.committed = true;
    Ok(())
  }

  fn rewind_current(&mut self) -> Result<(), ReaderError> {
    let Some(open) = self.current.as_mut() else {
      return Ok(());
    };
    info!(
      path = %open.file.path().display(),
      position = open.stream.mark_position_value(),
      "Last batch was never committed, rewinding"
    );
    match open.stream.reset() {
      Ok(()) => Ok(()),
      Err(e) if e.is_per_file() => {
        self.fail_current(&e);
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }

  fn fail_current(&mut self, reason: &ArchiveError) {
    let Some(mut open) = self.current.take() else {
      return;
    };
    let path = open.file.path().to_path_buf();
    warn!(path = %path.display(), error = %reason, "Skipping file for the rest of this run");
    if let Err(e) = open.stream.close() {
      warn!(path = %path.display(), error = %e, "Failed to close position record");
    }
    self.failed.insert(path);
  }

  fn open_next_file(&mut self) -> Result<Option<OpenFile>, ReaderError> {
    while let Some(path) = self.select_next_file()? {
      match self.open_file(&path) {
        Ok(open) => return Ok(Some(open)),
        Err(e) if e.is_per_file() => {
          warn!(path = %path.display(), error = %e, "Skipping file for the rest of this run");
          self.failed.insert(path);
        }
        Err(e) => return Err(e),
      }
    }
    debug!(spool_dir = %self.spool_dir.display(), "No eligible files");
    Ok(None)
  }

  fn open_file(&self, path: &Path) -> Result<OpenFile, ReaderError> {
    let file = SourceFile::stat(path).map_err(|source| ReaderError::Stat {
      path: path.to_path_buf(),
      source,
    })?;
    let tracker = self.trackers.tracker_for(path, file.stamp())?;
    let meta_path = tracker.meta_path().to_path_buf();
    let stream = ArchiveStream::open(path, Box::new(tracker), self.options.clone())?;

    info!(
      path = %path.display(),
      entry = %stream.entry_name(),
      bytes = stream.length(),
      position = stream.tell(),
      "Opened spool file"
    );
    Ok(OpenFile {
      basename: file.file_name(),
      file,
      stream,
      meta_path,
    })
  }

  /// Drop the record of the exhausted file, then apply the delete policy
  fn retire_current(&mut self) -> Result<(), ReaderError> {
    let Some(mut open) = self.current.take() else {
      return Ok(());
    };
    open
      .stream
      .close()
      .map_err(|e| tracker_failure(&open.meta_path, e))?;

    let path = open.file.path();
    let now = SourceFile::stat(path).map_err(|source| ReaderError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    if now.modified() != open.file.modified() || now.len() != open.file.len() {
      return Err(ReaderError::FileModified {
        path: path.to_path_buf(),
      });
    }

    // Record goes first: a crash before the rename or delete re-reads the file
    self.trackers.remove(path)?;
    match self.delete_policy {
      DeletePolicy::Never => self.roll(path)?,
      DeletePolicy::Immediate => {
        fs::remove_file(path).map_err(|source| ReaderError::Io {
          path: path.to_path_buf(),
          source,
        })?;
        info!(path = %path.display(), "Deleted consumed file");
      }
    }
    Ok(())
  }

  fn roll(&self, path: &Path) -> Result<(), ReaderError> {
    let io_err = |source| ReaderError::Io {
      path: path.to_path_buf(),
      source,
    };
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let completed = path.with_file_name(format!("{}{}", name, self.completed_suffix));

    if completed.exists() {
      let same = fs::read(path).map_err(io_err)? == fs::read(&completed).map_err(io_err)?;
      if !same {
        return Err(ReaderError::NameReused {
          path: path.to_path_buf(),
          completed,
        });
      }
      warn!(
        path = %path.display(),
        completed = %completed.display(),
        "Completed file already exists with the same content, removing source"
      );
      fs::remove_file(path).map_err(io_err)?;
      return Ok(());
    }

    fs::rename(path, &completed).map_err(io_err)?;
    info!(path = %path.display(), completed = %completed.display(), "Rolled consumed file");
    Ok(())
  }
}

fn tracker_failure(meta_path: &Path, err: ArchiveError) -> ReaderError {
  match err {
    ArchiveError::Tracker(source) => TrackerError::Io {
      path: meta_path.to_path_buf(),
      source,
    }
    .into(),
    other => other.into(),
  }
}

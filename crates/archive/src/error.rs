use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which limit a container violated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
  Container,
  Entry,
}

impl fmt::Display for SizeLimit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SizeLimit::Container => f.write_str("container"),
      SizeLimit::Entry => f.write_str("entry"),
    }
  }
}

/// Errors raised while loading a container. All of them are fatal for the
/// file in question only.
#[derive(Error, Debug)]
pub enum OpenError {
  #[error("Failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Not a valid zip container {path}: {source}")]
  InvalidContainer {
    path: PathBuf,
    #[source]
    source: zip::result::ZipError,
  },

  #[error("Expected exactly one entry in {path}, found {count}")]
  NoEntryOrMultipleEntries { path: PathBuf, count: usize },

  #[error("{limit} size of {path} is {size} bytes, limit is {max} bytes")]
  SizeExceeded {
    path: PathBuf,
    limit: SizeLimit,
    size: u64,
    max: u64,
  },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
  #[error(transparent)]
  Open(#[from] OpenError),

  #[error("Malformed input in {path} at byte {position} ({len} bad bytes)")]
  Decode { path: PathBuf, position: u64, len: usize },

  #[error("Cannot seek {path} to {position}: entry is {length} bytes")]
  SeekOutOfRange { path: PathBuf, position: u64, length: u64 },

  #[error("Position tracker failed: {0}")]
  Tracker(#[source] std::io::Error),
}

impl ArchiveError {
  /// True when the error condemns only the current file; the caller may skip
  /// it and continue with others.
  pub fn is_per_file(&self) -> bool {
    !matches!(self, ArchiveError::Tracker(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tracker_errors_are_not_per_file() {
    let err = ArchiveError::Tracker(std::io::Error::other("disk full"));
    assert!(!err.is_per_file());

    let err = ArchiveError::Decode {
      path: PathBuf::from("a.zip"),
      position: 3,
      len: 1,
    };
    assert!(err.is_per_file());
  }

  #[test]
  fn test_size_exceeded_message() {
    let err = OpenError::SizeExceeded {
      path: PathBuf::from("big.zip"),
      limit: SizeLimit::Entry,
      size: 70,
      max: 64,
    };
    assert_eq!(err.to_string(), "entry size of big.zip is 70 bytes, limit is 64 bytes");
  }
}

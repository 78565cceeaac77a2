//! Resumable stream over the single entry of a zip container.
//!
//! The whole entry is decompressed into memory on open. Reads advance a byte
//! cursor; `tell()` reports the position after the last fully returned unit
//! and is what gets committed to the tracker.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use tracing::{debug, trace};
use zip::ZipArchive;
use zipspool_core::{DecodeErrorPolicy, SpoolConfig};

use crate::decoder::{CharDecoder, Decoded};
use crate::error::{ArchiveError, OpenError, SizeLimit};
use crate::tracker::PositionTracker;

/// How a container is validated and decoded
#[derive(Debug, Clone)]
pub struct StreamOptions {
  pub encoding: &'static Encoding,
  pub decode_error_policy: DecodeErrorPolicy,
  pub max_container_bytes: u64,
  pub max_entry_bytes: u64,
}

impl Default for StreamOptions {
  fn default() -> Self {
    let config = SpoolConfig::default();
    Self {
      encoding: encoding_rs::UTF_8,
      decode_error_policy: config.decode_error_policy,
      max_container_bytes: config.max_container_bytes,
      max_entry_bytes: config.max_entry_bytes,
    }
  }
}

impl StreamOptions {
  pub fn from_config(config: &SpoolConfig) -> zipspool_core::Result<Self> {
    Ok(Self {
      encoding: config.encoding()?,
      decode_error_policy: config.decode_error_policy,
      max_container_bytes: config.max_container_bytes,
      max_entry_bytes: config.max_entry_bytes,
    })
  }
}

/// The decompressed payload of a container
struct LoadedEntry {
  name: String,
  data: Vec<u8>,
}

/// Open `path`, check it holds exactly one entry within the size limits, and
/// decompress that entry.
fn load_entry(path: &Path, options: &StreamOptions) -> Result<LoadedEntry, OpenError> {
  let io_err = |source| OpenError::Io {
    path: path.to_path_buf(),
    source,
  };
  let zip_err = |source| OpenError::InvalidContainer {
    path: path.to_path_buf(),
    source,
  };

  let file = File::open(path).map_err(io_err)?;
  let container_size = file.metadata().map_err(io_err)?.len();
  if container_size > options.max_container_bytes {
    return Err(OpenError::SizeExceeded {
      path: path.to_path_buf(),
      limit: SizeLimit::Container,
      size: container_size,
      max: options.max_container_bytes,
    });
  }

  let mut archive = ZipArchive::new(BufReader::new(file)).map_err(zip_err)?;
  if archive.len() != 1 {
    return Err(OpenError::NoEntryOrMultipleEntries {
      path: path.to_path_buf(),
      count: archive.len(),
    });
  }

  let entry = archive.by_index(0).map_err(zip_err)?;
  let declared = entry.size();
  if declared > options.max_entry_bytes {
    return Err(OpenError::SizeExceeded {
      path: path.to_path_buf(),
      limit: SizeLimit::Entry,
      size: declared,
      max: options.max_entry_bytes,
    });
  }

  let name = entry.name().to_string();
  let mut data = Vec::with_capacity(declared as usize);
  // Headers can lie; never decompress past the limit
  entry
    .take(options.max_entry_bytes + 1)
    .read_to_end(&mut data)
    .map_err(io_err)?;
  if data.len() as u64 > options.max_entry_bytes {
    return Err(OpenError::SizeExceeded {
      path: path.to_path_buf(),
      limit: SizeLimit::Entry,
      size: data.len() as u64,
      max: options.max_entry_bytes,
    });
  }

  debug!(path = %path.display(), entry = %name, bytes = data.len(), "Loaded zip entry");
  Ok(LoadedEntry { name, data })
}

pub struct ArchiveStream {
  path: PathBuf,
  options: StreamOptions,
  tracker: Box<dyn PositionTracker>,
  entry_name: String,
  buf: Vec<u8>,
  /// Read cursor into `buf`
  position: usize,
  /// Position after the last unit handed out; what `mark()` persists
  sync_position: u64,
  decoder: CharDecoder,
  /// Second unit of a pair, returned by the next `read_char`
  held_unit: Option<u16>,
}

impl std::fmt::Debug for ArchiveStream {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ArchiveStream")
      .field("path", &self.path)
      .field("entry_name", &self.entry_name)
      .field("length", &self.buf.len())
      .field("position", &self.position)
      .field("sync_position", &self.sync_position)
      .finish()
  }
}

impl ArchiveStream {
  /// Load the container and seek to the tracker's position
  pub fn open(
    path: impl AsRef<Path>,
    tracker: Box<dyn PositionTracker>,
    options: StreamOptions,
  ) -> Result<Self, ArchiveError> {
    let path = path.as_ref().to_path_buf();
    let entry = load_entry(&path, &options)?;
    let decoder = CharDecoder::new(options.encoding, options.decode_error_policy);

    let mut stream = Self {
      path,
      options,
      tracker,
      entry_name: entry.name,
      buf: entry.data,
      position: 0,
      sync_position: 0,
      decoder,
      held_unit: None,
    };
    let start = stream.tracker.position();
    stream.seek(start)?;
    Ok(stream)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn entry_name(&self) -> &str {
    &self.entry_name
  }

  /// Decompressed entry length in bytes
  pub fn length(&self) -> u64 {
    self.buf.len() as u64
  }

  pub fn remaining(&self) -> u64 {
    (self.buf.len() - self.position) as u64
  }

  /// Copy raw bytes into `out`, returning 0 at end of entry
  pub fn read(&mut self, out: &mut [u8]) -> usize {
    let n = out.len().min(self.buf.len() - self.position);
    out[..n].copy_from_slice(&self.buf[self.position..self.position + n]);
    self.position += n;
    self.sync_position = self.position as u64;
    trace!(bytes = n, position = self.position, "read");
    n
  }

  pub fn read_byte(&mut self) -> Option<u8> {
    let mut byte = [0u8; 1];
    match self.read(&mut byte) {
      0 => None,
      _ => Some(byte[0]),
    }
  }

  /// Decode the next UTF-16 unit, or `None` at end of entry.
  ///
  /// A surrogate pair is returned over two calls; the position advances past
  /// the pair's bytes on the first of them.
  pub fn read_char(&mut self) -> Result<Option<u16>, ArchiveError> {
    if let Some(unit) = self.held_unit.take() {
      return Ok(Some(unit));
    }

    let step = match self.decoder.decode_next(&self.buf[self.position..]) {
      Ok(step) => step,
      Err(e) => {
        return Err(ArchiveError::Decode {
          path: self.path.clone(),
          position: (self.position + e.offset) as u64,
          len: e.len,
        });
      }
    };
    self.position += step.consumed;

    match step.decoded {
      Decoded::Unit(unit) => {
        self.sync_position = self.position as u64;
        Ok(Some(unit))
      }
      Decoded::Pair(first, second) => {
        if !(is_high_surrogate(first) && is_low_surrogate(second)) {
          trace!(first, second, "Decoded two units that are not a surrogate pair");
        }
        self.held_unit = Some(second);
        self.sync_position = self.position as u64;
        Ok(Some(first))
      }
      Decoded::End => Ok(None),
    }
  }

  /// Position that `mark()` would persist
  pub fn tell(&self) -> u64 {
    trace!(position = self.sync_position, "tell");
    self.sync_position
  }

  /// Move to the absolute byte `offset`: rewind to the start of the entry and
  /// skip forward. Decoder state and any held unit are discarded.
  pub fn seek(&mut self, offset: u64) -> Result<(), ArchiveError> {
    trace!(path = %self.path.display(), offset, "seek");
    if offset > self.length() {
      return Err(ArchiveError::SeekOutOfRange {
        path: self.path.clone(),
        position: offset,
        length: self.length(),
      });
    }

    self.position = 0;
    self.position += offset as usize;
    self.decoder.reset();
    self.held_unit = None;
    self.sync_position = offset;
    Ok(())
  }

  /// Persist the current position
  pub fn mark(&mut self) -> Result<(), ArchiveError> {
    let position = self.tell();
    self.tracker.store_position(position).map_err(ArchiveError::Tracker)
  }

  /// Persist an explicit position
  pub fn mark_position(&mut self, position: u64) -> Result<(), ArchiveError> {
    self.tracker.store_position(position).map_err(ArchiveError::Tracker)
  }

  /// Last persisted position
  pub fn mark_position_value(&self) -> u64 {
    self.tracker.position()
  }

  /// Reload the container from disk and return to the persisted position
  pub fn reset(&mut self) -> Result<(), ArchiveError> {
    let entry = load_entry(&self.path, &self.options)?;
    self.entry_name = entry.name;
    self.buf = entry.data;
    let position = self.tracker.position();
    debug!(path = %self.path.display(), position, "Reset stream to marked position");
    self.seek(position)
  }

  pub fn close(&mut self) -> Result<(), ArchiveError> {
    self.tracker.close().map_err(ArchiveError::Tracker)
  }
}

fn is_high_surrogate(unit: u16) -> bool {
  (0xD800..=0xDBFF).contains(&unit)
}

fn is_low_surrogate(unit: u16) -> bool {
  (0xDC00..=0xDFFF).contains(&unit)
}

//! Single-entry zip containers as resumable byte/character streams.
//!
//! ```text
//! zip file ──load──► entry buffer ──read()──────► EventAssembler ──► Event
//!                        │
//!                        └──read_char()──► CharDecoder (encoding_rs)
//! ```
//!
//! Positions are byte offsets into the decompressed entry. They are persisted
//! through a [`PositionTracker`] and restored on open and [`ArchiveStream::reset`].

pub mod assembler;
pub mod decoder;
pub mod error;
pub mod stream;
pub mod tracker;

pub use assembler::EventAssembler;
pub use decoder::{CharDecoder, DecodeError, Decoded, DecodeStep};
pub use error::{ArchiveError, OpenError, SizeLimit};
pub use stream::{ArchiveStream, StreamOptions};
pub use tracker::{MemoryTracker, PositionTracker};

/// Zip fixtures shared by the test suites of the workspace
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
  use std::io::Write;
  use std::path::{Path, PathBuf};

  use zip::write::SimpleFileOptions;

  /// Write a zip holding one entry per `(name, content)` pair.
  ///
  /// Panics on I/O errors.
  pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, content) in entries {
      writer.start_file(*name, SimpleFileOptions::default()).unwrap();
      writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
    path.to_path_buf()
  }
}

//! Spooling-directory source for single-entry zip containers.
//!
//! - [`reader::SpoolingReader`] selects, reads, commits and retires files
//! - [`tracker::TrackerDirectory`] keeps one durable position record per file
//! - [`source::SpoolDirectorySource`] runs the poll-commit loop against an
//!   [`sink::EventSink`]

pub mod counter;
pub mod reader;
pub mod sink;
pub mod source;
pub mod tracker;

pub use counter::{CounterSnapshot, SourceCounter};
pub use reader::{ReaderError, SourceFile, SpoolingReader};
pub use sink::{EventSink, SinkError};
pub use source::{LifecycleState, SourceError, SpoolDirectorySource};
pub use tracker::{DurablePositionTracker, FileStamp, PositionRecord, TrackerDirectory, TrackerError};

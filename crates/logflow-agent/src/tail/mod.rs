//! File tailing.
//!
//! Turns append-only byte streams of unknown encoding and unknown record
//! boundaries into bounded sequences of well-framed UTF-8 records, surviving
//! restarts through checkpoints and never losing or duplicating bytes across
//! partial reads, rotation, truncation, or sparse holes.

pub mod checkpoint;
pub mod encoding;
pub mod framer;
pub mod source;
pub mod tailer;

pub use checkpoint::{CheckpointRecord, CheckpointStore};
pub use encoding::FileEncoding;
pub use framer::{FrameMode, MultilinePatterns, RecordFramer};
pub use source::{DevInode, FileSignature, FileSource};
pub use tailer::{ReadOutcome, TailError, Tailer, TailerState};

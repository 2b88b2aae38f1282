//! Time-indexed transcript of an audiobook
//!
//! The index itself is a read-only artifact produced once per mapping by a
//! transcriber collaborator; this module loads it and answers the two
//! alignment queries the reconciliation engine needs.

pub mod index;
pub mod transcriber;
pub mod types;

pub use index::TranscriptIndex;
pub use transcriber::{CommandTranscriber, Transcriber};
pub use types::*;

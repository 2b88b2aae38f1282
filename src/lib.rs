//! abridge - three-way reading-progress bridge
//!
//! Keeps an audiobook server, an ebook sync service and a read-along
//! database agreed on where the user is in a book. Positions are translated
//! across media by aligning a time-indexed transcript of the audio with a
//! position-indexed linearization of the ebook.

pub mod adapters;
pub mod config;
pub mod ebook;
pub mod jobs;
pub mod matching;
pub mod store;
pub mod sync;
pub mod transcript;

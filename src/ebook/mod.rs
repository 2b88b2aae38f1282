//! Position-indexed linearization of an ebook
//!
//! Reads an EPUB container, linearizes its readable text in spine order with
//! per-span locator anchors, and answers the alignment queries of the
//! reconciliation engine. Built indices are cached on disk keyed by the
//! ebook's content hash.

pub mod container;
pub mod index;
pub mod types;

pub use container::EpubContainer;
pub use index::{content_hash, find_ebook, EbookIndex};
pub use types::*;

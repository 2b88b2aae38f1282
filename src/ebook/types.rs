//! Ebook-related type definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resolvable reference into a structured ebook: which sub-document, which
/// element within it, and where that sub-document sits in the spine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    /// Container path of the sub-document, e.g. `OPS/chapter-04.xhtml`.
    pub href: String,
    /// Element path inside the sub-document, e.g. `body/p[12]`.
    pub element_path: String,
    /// Zero-based position of the sub-document in the spine.
    pub spine_index: usize,
}

impl std::fmt::Display for Locator {
    /// Render in the XPath-like shape the ebook sync service stores.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "/body/DocFragment[{}]/{}",
            self.spine_index + 1,
            self.element_path
        )
    }
}

/// One contiguous stretch of linearized text anchored to a locator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub char_offset: usize,
    pub length: usize,
    pub locator: Locator,
}

/// Result of locating a query inside the linearization.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub fraction: f64,
    pub locator: Locator,
    pub char_offset: usize,
}

/// Ebook container and index errors
#[derive(Debug, Error)]
pub enum EbookError {
    #[error("ebook file not found: {file}")]
    NotFound { file: String },

    #[error("malformed container: {0}")]
    Container(String),

    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index cache error: {0}")]
    Cache(#[from] serde_json::Error),

    #[error("ebook contains no readable text")]
    Empty,
}

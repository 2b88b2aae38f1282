//! Linearized, position-indexed ebook text with locator anchors.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::ebook::container::EpubContainer;
use crate::ebook::types::{EbookError, Location, Locator, Span};
use crate::matching::{collapse_whitespace, FuzzyMatcher};

const WINDOW_HALF: usize = 600;
const WINDOW_MIN: usize = 800;
const WINDOW_MAX: usize = 2000;

/// On-disk cache shape, keyed by content hash.
#[derive(Debug, Serialize, Deserialize)]
struct CachedIndex {
    ebook_file: String,
    content_hash: String,
    linearization: String,
    spans: Vec<Span>,
}

/// Canonical linearization of one ebook.
///
/// Offsets, lengths and fractions are all defined over the linearization in
/// chars, never over raw bytes. Immutable per `(ebook_file, content_hash)`.
#[derive(Debug, Clone)]
pub struct EbookIndex {
    ebook_file: String,
    content_hash: String,
    epub_path: PathBuf,
    linearization: String,
    chars: Vec<char>,
    spans: Vec<Span>,
}

impl EbookIndex {
    /// Build the index by walking the container's spine.
    pub fn build(
        epub_path: impl Into<PathBuf>,
        ebook_file: &str,
        content_hash: &str,
    ) -> Result<Self, EbookError> {
        let epub_path = epub_path.into();
        let container = EpubContainer::open(&epub_path)?;

        let mut linearization = String::new();
        let mut offset = 0usize;
        let mut spans = Vec::new();
        for (spine_index, href) in container.spine_documents()?.iter().enumerate() {
            for block in container.text_blocks(href)? {
                let text = collapse_whitespace(&block.text);
                if text.is_empty() {
                    continue;
                }
                if !linearization.is_empty() {
                    linearization.push(' ');
                    offset += 1;
                }
                let length = text.chars().count();
                spans.push(Span {
                    char_offset: offset,
                    length,
                    locator: Locator {
                        href: href.clone(),
                        element_path: block.element_path,
                        spine_index,
                    },
                });
                linearization.push_str(&text);
                offset += length;
            }
        }
        if linearization.is_empty() {
            return Err(EbookError::Empty);
        }
        info!(
            ebook_file,
            chars = offset,
            spans = spans.len(),
            "ebook index built"
        );
        Ok(Self::from_parts(
            ebook_file.to_string(),
            content_hash.to_string(),
            epub_path,
            linearization,
            spans,
        ))
    }

    /// Assemble an index from already-linearized parts (cache load, tests).
    pub fn from_parts(
        ebook_file: String,
        content_hash: String,
        epub_path: PathBuf,
        linearization: String,
        spans: Vec<Span>,
    ) -> Self {
        let chars = linearization.chars().collect();
        Self {
            ebook_file,
            content_hash,
            epub_path,
            linearization,
            chars,
            spans,
        }
    }

    /// Locate the ebook under `books_dir`, then load the cached index for
    /// its content hash or build and cache it.
    pub fn load_or_build(
        books_dir: &Path,
        cache_dir: &Path,
        ebook_file: &str,
    ) -> Result<Self, EbookError> {
        let epub_path = find_ebook(books_dir, ebook_file).ok_or_else(|| EbookError::NotFound {
            file: ebook_file.to_string(),
        })?;
        let content_hash = content_hash(&epub_path)?;
        let cache_path = cache_dir.join(format!("{content_hash}.json"));

        if cache_path.exists() {
            match Self::load_cache(&cache_path, &epub_path) {
                Ok(index) => {
                    debug!(ebook_file, hash = %content_hash, "ebook index cache hit");
                    return Ok(index);
                }
                Err(err) => {
                    warn!(ebook_file, %err, "stale ebook index cache, rebuilding");
                }
            }
        }

        let index = Self::build(&epub_path, ebook_file, &content_hash)?;
        index.save_cache(&cache_path)?;
        Ok(index)
    }

    fn load_cache(cache_path: &Path, epub_path: &Path) -> Result<Self, EbookError> {
        let raw = fs::read_to_string(cache_path)?;
        let cached: CachedIndex = serde_json::from_str(&raw)?;
        Ok(Self::from_parts(
            cached.ebook_file,
            cached.content_hash,
            epub_path.to_path_buf(),
            cached.linearization,
            cached.spans,
        ))
    }

    fn save_cache(&self, cache_path: &Path) -> Result<(), EbookError> {
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let cached = CachedIndex {
            ebook_file: self.ebook_file.clone(),
            content_hash: self.content_hash.clone(),
            linearization: self.linearization.clone(),
            spans: self.spans.clone(),
        };
        let tmp = cache_path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&cached)?)?;
        fs::rename(&tmp, cache_path)?;
        Ok(())
    }

    pub fn ebook_file(&self) -> &str {
        &self.ebook_file
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Total chars of the linearization.
    pub fn total_chars(&self) -> usize {
        self.chars.len()
    }

    /// Convert a fraction move into a char count over this book.
    pub fn char_delta(&self, p1: f64, p2: f64) -> u64 {
        let l = self.chars.len() as f64;
        let a = (p1.clamp(0.0, 1.0) * l).floor() as i64;
        let b = (p2.clamp(0.0, 1.0) * l).floor() as i64;
        (b - a).unsigned_abs()
    }

    /// A paragraph-sized window of text centred at `p`, sized to survive
    /// ASR drift and cut after a sentence boundary where one is in reach.
    pub fn text_at_fraction(&self, p: f64) -> Option<String> {
        let l = self.chars.len();
        if l == 0 {
            return None;
        }
        let center = ((p.clamp(0.0, 1.0) * l as f64).floor() as usize).min(l - 1);
        let mut start = center.saturating_sub(WINDOW_HALF);
        let mut end = (center + WINDOW_HALF).min(l);
        if end - start < WINDOW_MIN {
            if start == 0 {
                end = WINDOW_MIN.min(l);
            } else {
                start = end.saturating_sub(WINDOW_MIN);
            }
        }
        let cap = (start + WINDOW_MAX).min(l);
        if let Some(stop) = (end..cap).find(|&i| matches!(self.chars[i], '.' | '!' | '?')) {
            end = stop + 1;
        }
        Some(self.chars[start..end].iter().collect())
    }

    /// Fuzzy-search the linearization for `query`.
    pub fn locate(&self, matcher: &FuzzyMatcher, query: &str) -> Option<Location> {
        let l = self.chars.len();
        if l == 0 {
            return None;
        }
        let span = matcher.find(query, &self.linearization)?;
        let idx = self
            .spans
            .partition_point(|s| s.char_offset <= span.start)
            .saturating_sub(1);
        Some(Location {
            fraction: span.midpoint() as f64 / l as f64,
            locator: self.spans[idx].locator.clone(),
            char_offset: span.start,
        })
    }

    /// Exact text of the element tagged `fragment_id` inside the
    /// sub-document `href`. Failures resolve to `None`; the caller falls
    /// back to a fraction-based window.
    pub fn fragment_text(&self, href: &str, fragment_id: &str) -> Option<String> {
        let container = match EpubContainer::open(&self.epub_path) {
            Ok(c) => c,
            Err(err) => {
                warn!(ebook_file = %self.ebook_file, %err, "container unavailable for fragment lookup");
                return None;
            }
        };
        match container.fragment_text(href, fragment_id) {
            Ok(Some(text)) => {
                let text = collapse_whitespace(&text);
                (!text.is_empty()).then_some(text)
            }
            Ok(None) => None,
            Err(err) => {
                debug!(href, fragment_id, %err, "fragment lookup failed");
                None
            }
        }
    }
}

/// Compute the content hash used as cache key and sync document id.
pub fn content_hash(path: &Path) -> Result<String, EbookError> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

/// Find an ebook by filename anywhere under the books directory.
pub fn find_ebook(books_dir: &Path, ebook_file: &str) -> Option<PathBuf> {
    WalkDir::new(books_dir)
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| {
            entry.file_type().is_file()
                && entry.file_name().to_string_lossy() == ebook_file
        })
        .map(|entry| entry.into_path())
}

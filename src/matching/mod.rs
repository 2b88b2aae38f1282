//! Approximate text alignment primitives
//!
//! Shared by the transcript and ebook indices: a normalization pass applied
//! when text is indexed, and a sliding-window fuzzy matcher that tolerates
//! ASR noise, punctuation drift and rewording.

pub mod fuzzy;
pub mod normalize;

pub use fuzzy::{FuzzyMatcher, MatchSpan, DEFAULT_ACCEPTANCE};
pub use normalize::{collapse_whitespace, fold_for_match};

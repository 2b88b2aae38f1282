//! Text normalization used by both indices and the matcher.
//!
//! Two distinct passes with different guarantees:
//!
//! * [`collapse_whitespace`] runs once when text enters an index. Character
//!   offsets, fractions and span lengths are all defined over its output.
//! * [`fold_for_match`] maps text into the space the matcher scores in. It is
//!   length-preserving per `char`, so offsets found in match space are valid
//!   offsets into the indexed text.

/// Collapse all whitespace runs to a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_gap = false;
    for c in text.chars() {
        if c.is_whitespace() {
            in_gap = true;
            continue;
        }
        if in_gap && !out.is_empty() {
            out.push(' ');
        }
        in_gap = false;
        out.push(c);
    }
    out
}

/// Fold one character into match space: letters and digits lowercase,
/// everything else (whitespace, ASCII and smart punctuation, dashes,
/// ellipses) becomes a plain space. One char in, one char out, so smart
/// quotes, hyphen variants and dropped punctuation all score identically.
pub fn fold_char(c: char) -> char {
    if c.is_alphanumeric() {
        c.to_lowercase().next().unwrap_or(c)
    } else {
        ' '
    }
}

/// Fold a whole string into match space. Output has the same char count as
/// the input.
pub fn fold_for_match(text: &str) -> Vec<char> {
    text.chars().map(fold_char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn collapses_runs_and_trims() {
        assert_eq!(collapse_whitespace("  a\t\tb\n\nc  "), "a b c");
        assert_eq!(collapse_whitespace(""), "");
        assert_eq!(collapse_whitespace(" \n "), "");
    }

    #[test]
    fn folding_drops_case_and_punctuation() {
        let folded: String = fold_for_match("Hello, World!").into_iter().collect();
        assert_eq!(folded, "hello  world ");
    }

    #[test]
    fn smart_quotes_fold_like_ascii() {
        let smart: Vec<char> = fold_for_match("she said \u{201C}don\u{2019}t\u{201D}");
        let ascii: Vec<char> = fold_for_match("she said \"don't\"");
        assert_eq!(smart, ascii);
    }

    proptest! {
        #[test]
        fn folding_preserves_char_count(s in "\\PC*") {
            prop_assert_eq!(fold_for_match(&s).len(), s.chars().count());
        }
    }
}

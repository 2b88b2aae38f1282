//! Sliding-window approximate string search.
//!
//! Two-pass design so that locating a paragraph inside a full-length book
//! stays cheap: a coarse bigram sweep narrows the region, then windows of
//! several lengths around the best coarse hit are scored with normalized
//! Levenshtein similarity. Returning `None` instead of a weak match is the
//! intended failure mode; callers treat it as "do nothing this cycle".

use std::collections::HashMap;

use crate::matching::normalize::fold_for_match;

/// Default acceptance threshold for a window to count as a match.
pub const DEFAULT_ACCEPTANCE: f64 = 0.70;

/// A matched window in the target, in char offsets over the indexed text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

impl MatchSpan {
    pub fn midpoint(&self) -> usize {
        (self.start + self.end) / 2
    }
}

/// Approximate substring matcher with a fixed acceptance threshold.
#[derive(Debug, Clone, Copy)]
pub struct FuzzyMatcher {
    acceptance: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPTANCE)
    }
}

impl FuzzyMatcher {
    pub fn new(acceptance: f64) -> Self {
        Self { acceptance }
    }

    /// Find the best window of `target` approximately matching `query`.
    ///
    /// Windows of length 0.8n to 1.25n are considered. Ties keep the
    /// earliest position. Returns `None` when nothing reaches the
    /// acceptance threshold.
    pub fn find(&self, query: &str, target: &str) -> Option<MatchSpan> {
        let q = fold_for_match(query);
        let t = fold_for_match(target);
        let n = q.len();
        let m = t.len();
        if n == 0 || m == 0 {
            return None;
        }
        let qs: String = q.iter().collect();

        // Target barely longer than the query: score it whole.
        if m <= n + n / 4 {
            let ts: String = t.iter().collect();
            let score = strsim::normalized_levenshtein(&qs, &ts);
            return (score >= self.acceptance).then_some(MatchSpan {
                start: 0,
                end: m,
                score,
            });
        }

        let anchor = coarse_scan(&q, &t);
        self.refine(&qs, &t, n, anchor)
    }

    fn refine(&self, qs: &str, t: &[char], n: usize, anchor: usize) -> Option<MatchSpan> {
        let m = t.len();
        let lengths = [(n * 4 / 5).max(1), n, n * 5 / 4];
        let lo = anchor.saturating_sub(n);
        let hi = (anchor + n).min(m.saturating_sub(1));
        let step = (n / 8).max(1);

        let mut best: Option<MatchSpan> = None;
        let mut start = lo;
        while start <= hi {
            for &len in &lengths {
                if start + len > m {
                    continue;
                }
                let window: String = t[start..start + len].iter().collect();
                let score = strsim::normalized_levenshtein(qs, &window);
                if best.map_or(true, |b| score > b.score) {
                    best = Some(MatchSpan {
                        start,
                        end: start + len,
                        score,
                    });
                }
            }
            start += step;
        }
        best.filter(|b| b.score >= self.acceptance)
    }
}

/// Cheap first pass: slide a query-sized window in half-window steps and
/// rank by character-bigram overlap. Returns the start of the best window;
/// ties keep the earliest.
fn coarse_scan(q: &[char], t: &[char]) -> usize {
    let n = q.len();
    let m = t.len();
    let query_grams = bigram_counts(q);
    let query_total: usize = query_grams.values().sum();
    let step = (n / 2).max(1);

    let mut best_start = 0usize;
    let mut best_score = f64::MIN;
    let mut start = 0usize;
    while start + n <= m {
        let window_grams = bigram_counts(&t[start..start + n]);
        let mut overlap = 0usize;
        for (gram, count) in &window_grams {
            if let Some(qc) = query_grams.get(gram) {
                overlap += count.min(qc);
            }
        }
        let window_total: usize = window_grams.values().sum();
        let denom = query_total + window_total;
        let score = if denom == 0 {
            0.0
        } else {
            2.0 * overlap as f64 / denom as f64
        };
        if score > best_score {
            best_score = score;
            best_start = start;
        }
        start += step;
    }
    best_start
}

fn bigram_counts(chars: &[char]) -> HashMap<(char, char), usize> {
    let mut counts = HashMap::new();
    for pair in chars.windows(2) {
        if pair[0] == ' ' && pair[1] == ' ' {
            continue;
        }
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const TARGET: &str = "It was a bright cold day in April, and the clocks were \
        striking thirteen. Winston Smith, his chin nuzzled into his breast in an \
        effort to escape the vile wind, slipped quickly through the glass doors \
        of Victory Mansions, though not quickly enough to prevent a swirl of \
        gritty dust from entering along with him.";

    #[test]
    fn finds_exact_phrase() {
        let matcher = FuzzyMatcher::default();
        let span = matcher
            .find("his chin nuzzled into his breast", TARGET)
            .expect("exact phrase should match");
        assert!(span.score > 0.95);
        let found: String = TARGET.chars().skip(span.start).take(8).collect();
        assert!(found.to_lowercase().starts_with("his chin"), "{found:?}");
    }

    #[rstest]
    #[case("his chin nuzzle into his breasts")]
    #[case("is chin nuzzled in to his breast")]
    #[case("His chin, nuzzled into his breast")]
    fn survives_asr_noise(#[case] query: &str) {
        let matcher = FuzzyMatcher::default();
        let span = matcher.find(query, TARGET).expect("noisy query should match");
        assert!(span.score >= DEFAULT_ACCEPTANCE);
    }

    #[test]
    fn rejects_unrelated_text() {
        let matcher = FuzzyMatcher::default();
        assert!(matcher
            .find("quantum chromodynamics lattice simulation", TARGET)
            .is_none());
    }

    #[test]
    fn smart_punctuation_scores_like_ascii() {
        let matcher = FuzzyMatcher::default();
        let plain = matcher.find("don't stop now", "she said don't stop now please");
        let smart = matcher.find(
            "don\u{2019}t stop now",
            "she said don\u{2019}t stop now please",
        );
        let (a, b) = (plain.unwrap(), smart.unwrap());
        assert!((a.score - b.score).abs() < f64::EPSILON);
    }

    #[test]
    fn duplicate_phrase_resolves_to_earliest() {
        let target = "the bell rang twice. much later, after dinner, the bell rang twice.";
        let matcher = FuzzyMatcher::default();
        let span = matcher.find("the bell rang twice", target).unwrap();
        assert!(span.start < 5, "expected earliest occurrence, got {span:?}");
    }

    #[test]
    fn empty_inputs_never_match() {
        let matcher = FuzzyMatcher::default();
        assert!(matcher.find("", TARGET).is_none());
        assert!(matcher.find("anything", "").is_none());
    }
}

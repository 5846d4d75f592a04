//! Approximate term matching against the index vocabulary.

use crate::error::{Error, Result};
use crate::index::{DocId, InvertedIndex};
use crate::tokenizer::tokenize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Levenshtein distance over chars, two-row dynamic programming.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized edit similarity in `[0, 1]`; 1.0 means identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Up to `max_candidates` vocabulary terms whose similarity to `word` is at
/// least `cutoff`, best first.
pub fn close_matches<'v, I>(word: &str, vocabulary: I, max_candidates: usize, cutoff: f64) -> Vec<&'v str>
where
    I: IntoIterator<Item = &'v str>,
{
    let mut scored: Vec<(&str, f64)> = vocabulary
        .into_iter()
        .map(|term| (term, similarity(word, term)))
        .filter(|(_, s)| *s >= cutoff)
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    scored.truncate(max_candidates);
    scored.into_iter().map(|(term, _)| term).collect()
}

/// Union of the postings of every close match of every query token.
pub fn fuzzy_match(
    index: &InvertedIndex,
    query: &str,
    max_candidates: usize,
    cutoff: f64,
) -> Result<BTreeSet<DocId>> {
    if !(0.0..=1.0).contains(&cutoff) {
        return Err(Error::Validation(format!("fuzzy cutoff must be within [0, 1], got {cutoff}")));
    }
    let mut matched = BTreeSet::new();
    for word in tokenize(query) {
        for term in close_matches(word, index.vocabulary(), max_candidates, cutoff) {
            if let Some(ids) = index.postings(term) {
                matched.extend(ids.iter().cloned());
            }
        }
    }
    tracing::debug!(query, matched = matched.len(), "fuzzy match");
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_counts_edits() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert_eq!(levenshtein("café", "cafe"), 1);
    }

    #[test]
    fn similarity_is_normalized() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("apple", "apple"), 1.0);
        assert!((similarity("apple", "appel") - 0.6).abs() < 1e-12);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn close_matches_ranks_and_truncates() {
        let vocab = ["apples", "apple", "ample", "banana"];
        let got = close_matches("apple", vocab, 2, 0.8);
        assert_eq!(got, vec!["apple", "apples"]);
    }

    #[test]
    fn fuzzy_match_unions_postings() {
        let mut idx = InvertedIndex::new();
        idx.insert("1", "colour chart");
        idx.insert("2", "color wheel");
        idx.insert("3", "wheels");
        let got = fuzzy_match(&idx, "colour wheel", 5, 0.8).unwrap();
        assert_eq!(got.into_iter().collect::<Vec<_>>(), vec!["1", "2", "3"]);
    }

    #[test]
    fn exact_cutoff_returns_only_exact_term() {
        let mut idx = InvertedIndex::new();
        idx.insert("1", "apple");
        idx.insert("2", "apples");
        let got = fuzzy_match(&idx, "apple", 5, 1.0).unwrap();
        assert_eq!(&got, idx.postings("apple").unwrap());
    }

    #[test]
    fn rejects_out_of_range_cutoff() {
        let idx = InvertedIndex::new();
        assert!(matches!(fuzzy_match(&idx, "x", 5, 1.5), Err(Error::Validation(_))));
    }
}

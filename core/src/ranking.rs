//! Lexical scoring over an [`InvertedIndex`].
//!
//! Every ranking returns documents by descending score; equal scores are
//! ordered by ascending document id so results are reproducible.

use crate::index::{DocId, InvertedIndex};
use crate::tokenizer::tokenize;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDoc {
    pub id: DocId,
    pub score: f64,
}

/// One result row as returned to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: DocId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// term frequency saturation
    pub k1: f64,
    /// length normalization
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: 1.5, b: 0.75 } }
}

/// Scoring used after a boolean filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scorer {
    TfIdf,
    Bm25(Bm25Params),
}

/// Query term -> number of occurrences in the query.
fn query_term_counts(query: &str) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for term in tokenize(query) {
        *counts.entry(term).or_insert(0) += 1;
    }
    counts
}

fn tfidf_idf(num_docs: usize, doc_freq: usize) -> f64 {
    ((num_docs as f64 + 1.0) / (doc_freq as f64 + 1.0)).ln() + 1.0
}

fn bm25_idf(num_docs: usize, doc_freq: usize) -> f64 {
    let n = num_docs as f64;
    let df = doc_freq as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Query term weight = query term frequency x smoothed idf, with N counting
/// only documents that hold at least one term.
pub fn compute_term_weights<'q>(index: &InvertedIndex, query: &'q str) -> BTreeMap<&'q str, f64> {
    let n = index.indexed_len();
    query_term_counts(query)
        .into_iter()
        .map(|(term, qtf)| (term, qtf as f64 * tfidf_idf(n, index.doc_freq(term))))
        .collect()
}

/// Sum query term weights over every document holding any query term.
pub fn tfidf_rank(index: &InvertedIndex, query: &str) -> Vec<ScoredDoc> {
    let weights = compute_term_weights(index, query);
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for (term, weight) in &weights {
        if let Some(ids) = index.postings(term) {
            for id in ids {
                *scores.entry(id.as_str()).or_insert(0.0) += weight;
            }
        }
    }
    into_ranked(scores)
}

/// Okapi BM25 over every document holding any query term.
pub fn bm25_rank(index: &InvertedIndex, query: &str, params: &Bm25Params) -> Vec<ScoredDoc> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for (term, qtf) in query_term_counts(query) {
        let Some(ids) = index.postings(term) else { continue };
        let idf = bm25_idf(index.len(), ids.len());
        for id in ids {
            let s = bm25_term_score(index, id, term, idf, params);
            *scores.entry(id.as_str()).or_insert(0.0) += s * qtf as f64;
        }
    }
    into_ranked(scores)
}

fn bm25_term_score(index: &InvertedIndex, id: &str, term: &str, idf: f64, params: &Bm25Params) -> f64 {
    let tf = index.term_frequency(id, term) as f64;
    let len_ratio = if index.avg_doc_length > 0.0 {
        index.doc_length(id) as f64 / index.avg_doc_length
    } else {
        1.0
    };
    let norm = params.k1 * (1.0 - params.b + params.b * len_ratio);
    idf * (tf * (params.k1 + 1.0)) / (tf + norm)
}

/// Documents containing every query term. Empty query or any unknown term
/// yields an empty set.
pub fn boolean_filter(index: &InvertedIndex, query: &str) -> BTreeSet<DocId> {
    let terms = tokenize(query);
    let Some((first, rest)) = terms.split_first() else { return BTreeSet::new() };
    let Some(seed) = index.postings(first) else { return BTreeSet::new() };
    let mut result = seed.clone();
    for term in rest {
        match index.postings(term) {
            Some(ids) => result.retain(|id| ids.contains(id)),
            None => return BTreeSet::new(),
        }
        if result.is_empty() {
            break;
        }
    }
    result
}

/// Score only the documents in `filtered` (normally a [`boolean_filter`]
/// result).
///
/// With TF-IDF the query is first narrowed to the terms whose postings still
/// intersect `filtered`, and weights are recomputed from that narrowed query.
pub fn boolean_then_rank(
    index: &InvertedIndex,
    query: &str,
    filtered: &BTreeSet<DocId>,
    scorer: Scorer,
) -> Vec<ScoredDoc> {
    if filtered.is_empty() {
        return Vec::new();
    }
    let mut scores: HashMap<&str, f64> = HashMap::new();
    match scorer {
        Scorer::TfIdf => {
            let narrowed: Vec<&str> = tokenize(query)
                .into_iter()
                .filter(|term| {
                    index
                        .postings(term)
                        .is_some_and(|ids| ids.iter().any(|id| filtered.contains(id)))
                })
                .collect();
            let narrowed = narrowed.join(" ");
            let weights = compute_term_weights(index, &narrowed);
            for id in filtered {
                let score: f64 = weights
                    .iter()
                    .filter(|(term, _)| index.postings(term).is_some_and(|ids| ids.contains(id)))
                    .map(|(_, w)| *w)
                    .sum();
                scores.insert(id.as_str(), score);
            }
        }
        Scorer::Bm25(params) => {
            for (term, qtf) in query_term_counts(query) {
                let Some(ids) = index.postings(term) else { continue };
                let idf = bm25_idf(index.len(), ids.len());
                for id in filtered.iter().filter(|id| ids.contains(*id)) {
                    let s = bm25_term_score(index, id, term, idf, &params);
                    *scores.entry(id.as_str()).or_insert(0.0) += s * qtf as f64;
                }
            }
        }
    }
    into_ranked(scores)
}

/// Descending score, ascending id on ties.
pub fn sort_by_score(docs: &mut [ScoredDoc]) {
    docs.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn into_ranked(scores: HashMap<&str, f64>) -> Vec<ScoredDoc> {
    let mut ranked: Vec<ScoredDoc> = scores
        .into_iter()
        .map(|(id, score)| ScoredDoc { id: id.to_string(), score })
        .collect();
    sort_by_score(&mut ranked);
    ranked
}

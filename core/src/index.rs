use crate::tokenizer::tokenize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Opaque, stable document identifier supplied by the data source.
pub type DocId = String;

/// In-memory inverted index: the unit that is snapshotted to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    /// term -> ids of the documents containing it, never empty
    pub postings: HashMap<String, BTreeSet<DocId>>,
    /// document id -> number of whitespace tokens
    pub doc_lengths: HashMap<DocId, usize>,
    pub documents: HashMap<DocId, String>,
    pub avg_doc_length: f64,
    /// Bumped on every mutation; a persisted query cache is only valid for
    /// the generation it was computed against.
    pub generation: u64,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.documents.len() }

    pub fn is_empty(&self) -> bool { self.documents.is_empty() }

    /// Documents that appear in at least one posting set, i.e. whose text
    /// has at least one token.
    pub fn indexed_len(&self) -> usize {
        self.doc_lengths.values().filter(|&&len| len > 0).count()
    }

    pub fn contains(&self, id: &str) -> bool { self.documents.contains_key(id) }

    pub fn text(&self, id: &str) -> Option<&str> {
        self.documents.get(id).map(String::as_str)
    }

    pub fn doc_length(&self, id: &str) -> usize {
        self.doc_lengths.get(id).copied().unwrap_or(0)
    }

    pub fn postings(&self, term: &str) -> Option<&BTreeSet<DocId>> {
        self.postings.get(term)
    }

    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, BTreeSet::len)
    }

    pub fn vocabulary(&self) -> impl Iterator<Item = &str> {
        self.postings.keys().map(String::as_str)
    }

    /// Literal occurrence count of `term` in the stored text of `id`.
    pub fn term_frequency(&self, id: &str, term: &str) -> usize {
        self.documents
            .get(id)
            .map_or(0, |text| tokenize(text).into_iter().filter(|t| *t == term).count())
    }

    /// Index `text` under `id`. An existing document with the same id is
    /// replaced. Returns true when a previous version was replaced.
    pub fn insert(&mut self, id: &str, text: &str) -> bool {
        let replaced = self.unlink(id);
        self.link(id, text);
        self.update_avg_doc_length();
        self.generation += 1;
        replaced
    }

    /// Index a batch, recomputing the average length once at the end.
    pub fn insert_many<'a, I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut count = 0;
        for (id, text) in records {
            self.unlink(id);
            self.link(id, text);
            count += 1;
        }
        self.update_avg_doc_length();
        self.generation += 1;
        count
    }

    /// Drop `id` from every structure. Returns false when it was not indexed.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.unlink(id);
        if removed {
            self.update_avg_doc_length();
            self.generation += 1;
        }
        removed
    }

    pub fn clear(&mut self) {
        *self = Self { generation: self.generation + 1, ..Self::default() };
    }

    /// Check the structural invariants a loaded snapshot must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.doc_lengths.len() != self.documents.len() {
            return Err(format!(
                "{} lengths for {} documents",
                self.doc_lengths.len(),
                self.documents.len()
            ));
        }
        for (term, ids) in &self.postings {
            if ids.is_empty() {
                return Err(format!("empty posting set for term {term:?}"));
            }
            if let Some(missing) = ids.iter().find(|id| !self.documents.contains_key(*id)) {
                return Err(format!("term {term:?} posts unknown document {missing:?}"));
            }
        }
        if !self.avg_doc_length.is_finite() {
            return Err("average length is not finite".into());
        }
        Ok(())
    }

    fn link(&mut self, id: &str, text: &str) {
        let terms = tokenize(text);
        self.doc_lengths.insert(id.to_string(), terms.len());
        for term in terms {
            self.postings.entry(term.to_string()).or_default().insert(id.to_string());
        }
        self.documents.insert(id.to_string(), text.to_string());
    }

    fn unlink(&mut self, id: &str) -> bool {
        let Some(text) = self.documents.remove(id) else { return false };
        self.doc_lengths.remove(id);
        for term in tokenize(&text) {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        true
    }

    fn update_avg_doc_length(&mut self) {
        self.avg_doc_length = if self.doc_lengths.is_empty() {
            0.0
        } else {
            let total: usize = self.doc_lengths.values().sum();
            total as f64 / self.doc_lengths.len() as f64
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(set: Option<&BTreeSet<DocId>>) -> Vec<&str> {
        set.map(|s| s.iter().map(String::as_str).collect()).unwrap_or_default()
    }

    #[test]
    fn insert_builds_postings_and_lengths() {
        let mut idx = InvertedIndex::new();
        idx.insert("1", "red apple red");
        idx.insert("2", "green apple");
        assert_eq!(ids(idx.postings("apple")), vec!["1", "2"]);
        assert_eq!(ids(idx.postings("red")), vec!["1"]);
        assert_eq!(idx.doc_length("1"), 3);
        assert_eq!(idx.avg_doc_length, 2.5);
        assert_eq!(idx.term_frequency("1", "red"), 2);
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn reinsert_replaces_old_terms() {
        let mut idx = InvertedIndex::new();
        idx.insert("1", "red apple");
        assert!(idx.insert("1", "blue car"));
        assert!(idx.postings("red").is_none());
        assert_eq!(ids(idx.postings("car")), vec!["1"]);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn remove_drops_empty_postings_and_recomputes_average() {
        let mut idx = InvertedIndex::new();
        idx.insert("1", "red apple");
        idx.insert("2", "green apple pie");
        assert!(idx.remove("2"));
        assert!(idx.postings("green").is_none());
        assert_eq!(ids(idx.postings("apple")), vec!["1"]);
        assert_eq!(idx.avg_doc_length, 2.0);
        assert!(!idx.remove("2"));
    }

    #[test]
    fn removing_last_document_resets_average() {
        let mut idx = InvertedIndex::new();
        idx.insert("1", "solo");
        idx.remove("1");
        assert!(idx.is_empty());
        assert_eq!(idx.avg_doc_length, 0.0);
        assert!(idx.postings.is_empty());
    }

    #[test]
    fn validate_rejects_dangling_posting() {
        let mut idx = InvertedIndex::new();
        idx.insert("1", "red");
        idx.postings.entry("red".into()).or_default().insert("9".into());
        assert!(idx.validate().is_err());
    }
}

use crate::index::{DocId, InvertedIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Memoized boolean-AND results keyed by the raw query string.
///
/// Holds ids only, never scores. Any index mutation must [`reset`] the whole
/// cache to the new index generation.
///
/// [`reset`]: QueryCache::reset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryCache {
    generation: u64,
    entries: HashMap<String, BTreeSet<DocId>>,
}

impl QueryCache {
    pub fn new() -> Self { Self::default() }

    /// Empty cache for an index at `generation`.
    pub fn for_generation(generation: u64) -> Self {
        Self { generation, entries: HashMap::new() }
    }

    /// Index generation the entries were computed against.
    pub fn generation(&self) -> u64 { self.generation }

    pub fn get(&self, query: &str) -> Option<&BTreeSet<DocId>> {
        self.entries.get(query)
    }

    pub fn insert(&mut self, query: &str, ids: BTreeSet<DocId>) {
        self.entries.insert(query.to_string(), ids);
    }

    pub fn clear(&mut self) { self.entries.clear(); }

    /// Drop every entry and follow the index to `generation`.
    pub fn reset(&mut self, generation: u64) {
        self.entries.clear();
        self.generation = generation;
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// True when the cache was computed against this exact index generation
    /// and every cached id is still present in `index`.
    pub fn is_consistent_with(&self, index: &InvertedIndex) -> bool {
        self.generation == index.generation && self.entries.values().flatten().all(|id| index.contains(id))
    }
}

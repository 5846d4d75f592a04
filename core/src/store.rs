//! The owned, shareable index service: inverted index + query cache +
//! persistence behind a single-writer lock.

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::persist::{self, IndexPaths, PersistError};
use crate::ranking::{self, ScoredDoc, Scorer, SearchHit};
use crate::{fuzzy, DocId, InvertedIndex, QueryCache};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub terms: usize,
    pub avg_doc_length: f64,
    pub cached_queries: usize,
}

/// One persisted text index.
///
/// Mutations hold the index write lock while they apply, clear the cache and
/// rewrite the snapshot. Reads share the read lock. Cache writes happen while
/// the read lock is held, so a result is never cached across a mutation.
pub struct TextIndex {
    paths: IndexPaths,
    config: IndexConfig,
    index: RwLock<InvertedIndex>,
    cache: Mutex<QueryCache>,
    /// set under the write lock by [`TextIndex::destroy`]
    destroyed: AtomicBool,
}

impl TextIndex {
    /// Load the snapshot and cache at `paths`, starting empty when either is
    /// missing, corrupt or written by an incompatible version.
    pub fn open(paths: IndexPaths, config: IndexConfig) -> Self {
        let index = match persist::load_snapshot(&paths) {
            Ok(Some(index)) => {
                tracing::info!(index = %paths.name, documents = index.len(), "loaded snapshot");
                Some(index)
            }
            Ok(None) => {
                tracing::debug!(index = %paths.name, "no snapshot on disk, starting empty");
                None
            }
            Err(err) => {
                log_unreadable(&paths, "snapshot", &err);
                None
            }
        };
        let loaded = index.is_some();
        let index = index.unwrap_or_default();

        let cache = match persist::load_cache(&paths) {
            // a cache without its snapshot (or out of step with it) is stale
            Ok(Some(cache)) if loaded && cache.is_consistent_with(&index) => cache,
            Ok(Some(cache)) => {
                tracing::warn!(
                    index = %paths.name, cache_generation = cache.generation(), snapshot_generation = index.generation,
                    "discarding query cache that does not match the snapshot"
                );
                QueryCache::for_generation(index.generation)
            }
            Ok(None) => QueryCache::for_generation(index.generation),
            Err(err) => {
                log_unreadable(&paths, "query cache", &err);
                QueryCache::for_generation(index.generation)
            }
        };

        Self {
            paths,
            config,
            index: RwLock::new(index),
            cache: Mutex::new(cache),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str { &self.paths.name }

    pub fn paths(&self) -> &IndexPaths { &self.paths }

    pub fn config(&self) -> &IndexConfig { &self.config }

    pub fn len(&self) -> usize { self.index.read().len() }

    pub fn is_empty(&self) -> bool { self.index.read().is_empty() }

    pub fn get_document(&self, id: &str) -> Option<String> {
        self.index.read().text(id).map(str::to_string)
    }

    pub fn stats(&self) -> IndexStats {
        let index = self.index.read();
        IndexStats {
            documents: index.len(),
            terms: index.postings.len(),
            avg_doc_length: index.avg_doc_length,
            cached_queries: self.cache.lock().len(),
        }
    }

    /// Copy of the current index state.
    pub fn snapshot(&self) -> InvertedIndex { self.index.read().clone() }

    // ---- mutations ----

    /// Index (or replace) one document and persist.
    pub fn add_document(&self, id: &str, text: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Validation("document id must not be empty".into()));
        }
        let mut index = self.index.write();
        self.ensure_live()?;
        let replaced = index.insert(id, text);
        tracing::debug!(index = %self.paths.name, doc_id = id, replaced, "document added");
        self.commit(&index)
    }

    /// Index a batch with a single cache invalidation and a single snapshot
    /// rewrite. Records with an empty id are skipped.
    pub fn add_documents<I, S, T>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let records: Vec<(S, T)> = records
            .into_iter()
            .filter(|(id, _)| {
                let keep = !id.as_ref().is_empty();
                if !keep {
                    tracing::warn!(index = %self.paths.name, "skipping record with empty id");
                }
                keep
            })
            .collect();
        let mut index = self.index.write();
        self.ensure_live()?;
        let added = index.insert_many(records.iter().map(|(id, text)| (id.as_ref(), text.as_ref())));
        tracing::info!(index = %self.paths.name, added, documents = index.len(), "batch indexed");
        self.commit(&index)?;
        Ok(added)
    }

    /// Remove a document. Unknown ids yield [`Error::NotFound`] and change
    /// nothing.
    pub fn remove_document(&self, id: &str) -> Result<()> {
        let mut index = self.index.write();
        self.ensure_live()?;
        if !index.remove(id) {
            return Err(Error::NotFound(format!("document {id:?} in index {:?}", self.paths.name)));
        }
        tracing::debug!(index = %self.paths.name, doc_id = id, "document removed");
        self.commit(&index)
    }

    /// Back to the empty state.
    pub fn clear(&self) -> Result<()> {
        let mut index = self.index.write();
        self.ensure_live()?;
        index.clear();
        tracing::info!(index = %self.paths.name, "index cleared");
        self.commit(&index)
    }

    /// Delete the index files and refuse every later mutation, so a caller
    /// still holding this index cannot bring the files back.
    pub fn destroy(&self) -> Result<()> {
        let mut index = self.index.write();
        self.destroyed.store(true, Ordering::Release);
        index.clear();
        self.cache.lock().reset(index.generation);
        self.paths.remove_all()?;
        tracing::info!(index = %self.paths.name, "index files deleted");
        Ok(())
    }

    /// Caller holds the write lock.
    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::NotFound(format!("index {:?} was dropped", self.paths.name)));
        }
        Ok(())
    }

    /// Invalidate the cache and rewrite both files. Caller holds the write lock.
    fn commit(&self, index: &InvertedIndex) -> Result<()> {
        {
            let mut cache = self.cache.lock();
            cache.reset(index.generation);
            if let Err(err) = persist::save_cache(&self.paths, &cache) {
                tracing::warn!(index = %self.paths.name, error = %format!("{err:#}"), "failed to persist cleared query cache");
            }
        }
        persist::save_snapshot(&self.paths, index).map_err(|err| {
            tracing::error!(index = %self.paths.name, error = %format!("{err:#}"), "failed to persist snapshot");
            Error::Internal(format!("persisting index {:?}: {err:#}", self.paths.name))
        })
    }

    // ---- reads ----

    /// Cached boolean-AND filter.
    pub fn boolean_filter(&self, query: &str) -> BTreeSet<DocId> {
        let index = self.index.read();
        self.cached_filter(&index, query)
    }

    fn cached_filter(&self, index: &InvertedIndex, query: &str) -> BTreeSet<DocId> {
        if let Some(ids) = self.cache.lock().get(query) {
            tracing::trace!(index = %self.paths.name, query, "query cache hit");
            return ids.clone();
        }
        let ids = ranking::boolean_filter(index, query);
        if !crate::tokenizer::tokenize(query).is_empty() && !self.destroyed.load(Ordering::Acquire) {
            let mut cache = self.cache.lock();
            cache.insert(query, ids.clone());
            if let Err(err) = persist::save_cache(&self.paths, &cache) {
                tracing::warn!(index = %self.paths.name, error = %format!("{err:#}"), "failed to persist query cache");
            }
        }
        ids
    }

    /// Exact boolean search; hits carry no score.
    pub fn boolean_search(&self, query: &str) -> Vec<SearchHit> {
        let index = self.index.read();
        let ids = self.cached_filter(&index, query);
        ids.into_iter()
            .filter_map(|id| {
                let text = index.text(&id)?.to_string();
                Some(SearchHit { id, text, score: None })
            })
            .collect()
    }

    pub fn tfidf_search(&self, query: &str) -> Vec<SearchHit> {
        let index = self.index.read();
        to_hits(&index, ranking::tfidf_rank(&index, query))
    }

    pub fn bm25_search(&self, query: &str) -> Vec<SearchHit> {
        let index = self.index.read();
        to_hits(&index, ranking::bm25_rank(&index, query, &self.config.bm25))
    }

    /// Boolean filter, then rank the survivors.
    pub fn boolean_ranked_search(&self, query: &str, scorer: Scorer) -> Vec<SearchHit> {
        let index = self.index.read();
        let filtered = self.cached_filter(&index, query);
        to_hits(&index, ranking::boolean_then_rank(&index, query, &filtered, scorer))
    }

    pub fn boolean_tfidf_search(&self, query: &str) -> Vec<SearchHit> {
        self.boolean_ranked_search(query, Scorer::TfIdf)
    }

    pub fn boolean_bm25_search(&self, query: &str) -> Vec<SearchHit> {
        self.boolean_ranked_search(query, Scorer::Bm25(self.config.bm25))
    }

    /// Fuzzy search with the configured candidate count and cutoff.
    pub fn fuzzy_search(&self, query: &str) -> Vec<SearchHit> {
        let fuzzy = self.config.fuzzy;
        self.fuzzy_search_with(query, fuzzy.max_candidates, fuzzy.cutoff)
            .unwrap_or_else(|err| {
                tracing::warn!(index = %self.paths.name, error = %err, "configured fuzzy settings rejected");
                Vec::new()
            })
    }

    pub fn fuzzy_search_with(&self, query: &str, max_candidates: usize, cutoff: f64) -> Result<Vec<SearchHit>> {
        let index = self.index.read();
        let ids = fuzzy::fuzzy_match(&index, query, max_candidates, cutoff)?;
        Ok(ids
            .into_iter()
            .filter_map(|id| {
                let text = index.text(&id)?.to_string();
                Some(SearchHit { id, text, score: None })
            })
            .collect())
    }
}

fn to_hits(index: &InvertedIndex, ranked: Vec<ScoredDoc>) -> Vec<SearchHit> {
    ranked
        .into_iter()
        .filter_map(|doc| {
            let text = index.text(&doc.id)?.to_string();
            Some(SearchHit { id: doc.id, text, score: Some(doc.score) })
        })
        .collect()
}

fn log_unreadable(paths: &IndexPaths, what: &str, err: &anyhow::Error) {
    match err.downcast_ref::<PersistError>() {
        Some(PersistError::VersionMismatch { found, expected, .. }) => tracing::warn!(
            index = %paths.name, found, expected,
            "refusing {what} written by an incompatible version, starting empty"
        ),
        _ => tracing::warn!(
            index = %paths.name, error = %format!("{err:#}"),
            "{what} is unreadable, starting empty"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path) -> TextIndex {
        TextIndex::open(IndexPaths::new(dir, "t"), IndexConfig::default())
    }

    #[test]
    fn cache_is_invalidated_by_add() {
        let dir = tempdir().unwrap();
        let idx = open(dir.path());
        idx.add_document("1", "red apple").unwrap();
        assert_eq!(idx.boolean_search("apple").len(), 1);
        assert_eq!(idx.stats().cached_queries, 1);
        idx.add_document("2", "green apple").unwrap();
        assert_eq!(idx.stats().cached_queries, 0);
        assert_eq!(idx.boolean_search("apple").len(), 2);
    }

    #[test]
    fn empty_query_is_not_cached() {
        let dir = tempdir().unwrap();
        let idx = open(dir.path());
        idx.add_document("1", "red apple").unwrap();
        assert!(idx.boolean_search("  ").is_empty());
        assert_eq!(idx.stats().cached_queries, 0);
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let dir = tempdir().unwrap();
        let idx = open(dir.path());
        assert!(matches!(idx.remove_document("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn empty_id_is_rejected() {
        let dir = tempdir().unwrap();
        let idx = open(dir.path());
        assert!(matches!(idx.add_document("", "text"), Err(Error::Validation(_))));
        let added = idx.add_documents([("", "skip"), ("1", "keep")]).unwrap();
        assert_eq!(added, 1);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let idx = open(dir.path());
            idx.add_documents([("1", "red apple"), ("2", "green apple")]).unwrap();
            idx.boolean_search("apple");
        }
        let idx = open(dir.path());
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.stats().cached_queries, 1);
        assert_eq!(idx.get_document("2").as_deref(), Some("green apple"));
    }

    #[test]
    fn cache_left_over_from_an_earlier_state_is_discarded() {
        let dir = tempdir().unwrap();
        let cache_file = IndexPaths::new(dir.path(), "t").cache();
        let old_cache = dir.path().join("old.cache.bin");
        {
            let idx = open(dir.path());
            idx.add_documents([("1", "red apple"), ("2", "red car")]).unwrap();
            assert_eq!(idx.boolean_search("red").len(), 2);
            std::fs::copy(&cache_file, &old_cache).unwrap();
            // "2" still exists, so only the generation tells the caches apart
            idx.add_document("2", "green car").unwrap();
        }
        // the cleared cache never reached disk
        std::fs::copy(&old_cache, &cache_file).unwrap();

        let idx = open(dir.path());
        assert_eq!(idx.stats().cached_queries, 0);
        let hits = idx.boolean_search("red");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
    }
}

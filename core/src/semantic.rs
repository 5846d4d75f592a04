//! Contracts for the external semantic collaborators, plus an exact
//! in-process vector index.
//!
//! Swap in a remote ANN service by implementing [`VectorIndex`]; the hybrid
//! orchestrator only ever talks to the traits.

use crate::error::{Error, Result};
use crate::persist;
use crate::DocId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Text to fixed-dimension vector. Must be deterministic for a given model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Nearest-neighbor oracle owning its own vector storage.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace the whole contents.
    async fn build(&self, vectors: HashMap<DocId, Vec<f32>>) -> Result<()>;

    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()>;

    /// Returns false when `id` had no vector.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Up to `top_k` ids by descending similarity to `vector`.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<(DocId, f32)>>;

    /// Stored vector for `id`, if any.
    async fn vector(&self, id: &str) -> Result<Option<Vec<f32>>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool { self.len() == 0 }

    /// Stop writing to backing storage; the owning index is being dropped.
    /// Later calls still work in memory.
    fn detach(&self) {}
}

/// Cosine similarity; 0.0 when either side has zero magnitude or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Brute-force cosine index. Optionally persisted as a versioned blob after
/// every change.
pub struct FlatVectorIndex {
    path: Option<PathBuf>,
    detached: AtomicBool,
    vectors: RwLock<HashMap<DocId, Vec<f32>>>,
}

impl FlatVectorIndex {
    pub fn in_memory() -> Self {
        Self { path: None, detached: AtomicBool::new(false), vectors: RwLock::new(HashMap::new()) }
    }

    /// Load from `path`; unreadable files start empty.
    pub fn open(path: PathBuf) -> Self {
        let vectors = match persist::load_vectors(&path) {
            Ok(Some(vectors)) => vectors,
            Ok(None) => HashMap::new(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "vector file unreadable, starting empty");
                HashMap::new()
            }
        };
        Self { path: Some(path), detached: AtomicBool::new(false), vectors: RwLock::new(vectors) }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.vectors.read().values().next().map(Vec::len)
    }

    fn check_dimension(vectors: &HashMap<DocId, Vec<f32>>, vector: &[f32]) -> Result<()> {
        match vectors.values().next() {
            Some(existing) if existing.len() != vector.len() => Err(Error::Validation(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                existing.len()
            ))),
            _ => Ok(()),
        }
    }

    /// Drop the vectors of `ids`, persisting once. Returns how many existed.
    pub fn remove_many<I, S>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut guard = self.vectors.write();
        let mut removed = 0;
        for id in ids {
            let id: &str = id.as_ref();
            if guard.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.save(&guard)?;
        }
        Ok(removed)
    }

    /// Drop every vector. Returns how many there were.
    pub fn clear(&self) -> Result<usize> {
        let mut guard = self.vectors.write();
        let removed = guard.len();
        if removed > 0 {
            guard.clear();
            self.save(&guard)?;
        }
        Ok(removed)
    }

    // callers hold the write lock, which orders saves against `detach`
    fn save(&self, vectors: &HashMap<DocId, Vec<f32>>) -> Result<()> {
        match &self.path {
            Some(path) if !self.detached.load(Ordering::Acquire) => {
                persist::save_vectors(path, vectors).map_err(Error::from)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl VectorIndex for FlatVectorIndex {
    async fn build(&self, vectors: HashMap<DocId, Vec<f32>>) -> Result<()> {
        let mut dims = vectors.values().map(Vec::len);
        if let Some(first) = dims.next() {
            if dims.any(|d| d != first) {
                return Err(Error::Validation("vectors have mixed dimensions".into()));
            }
        }
        let mut guard = self.vectors.write();
        *guard = vectors;
        self.save(&guard)
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        let mut guard = self.vectors.write();
        // the single existing vector may be the one being replaced
        if !(guard.len() == 1 && guard.contains_key(id)) {
            Self::check_dimension(&guard, &vector)?;
        }
        guard.insert(id.to_string(), vector);
        self.save(&guard)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.remove_many([id])? > 0)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<(DocId, f32)>> {
        let guard = self.vectors.read();
        let mut scored: Vec<(DocId, f32)> = guard
            .iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(vector, v)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn vector(&self, id: &str) -> Result<Option<Vec<f32>>> {
        Ok(self.vectors.read().get(id).cloned())
    }

    fn len(&self) -> usize { self.vectors.read().len() }

    fn detach(&self) {
        let _guard = self.vectors.write();
        self.detached.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn query_orders_by_similarity() {
        let idx = FlatVectorIndex::in_memory();
        idx.upsert("x", vec![1.0, 0.0]).await.unwrap();
        idx.upsert("y", vec![0.0, 1.0]).await.unwrap();
        idx.upsert("xy", vec![1.0, 1.0]).await.unwrap();
        let got = idx.query(&[1.0, 0.1], 2).await.unwrap();
        let ids: Vec<_> = got.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["x", "xy"]);
    }

    #[tokio::test]
    async fn rejects_dimension_mismatch() {
        let idx = FlatVectorIndex::in_memory();
        idx.upsert("a", vec![1.0, 0.0]).await.unwrap();
        assert!(matches!(idx.upsert("b", vec![1.0]).await, Err(Error::Validation(_))));
        // replacing the only vector may change the dimension
        idx.upsert("a", vec![1.0, 0.0, 0.0]).await.unwrap();
        assert_eq!(idx.dimension(), Some(3));
    }

    #[tokio::test]
    async fn persists_between_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.vectors.bin");
        {
            let idx = FlatVectorIndex::open(path.clone());
            idx.build(HashMap::from([("a".to_string(), vec![0.5, 0.5])])).await.unwrap();
        }
        let idx = FlatVectorIndex::open(path);
        assert_eq!(idx.vector("a").await.unwrap(), Some(vec![0.5, 0.5]));
        assert!(idx.remove("a").await.unwrap());
        assert!(!idx.remove("a").await.unwrap());
    }

    #[tokio::test]
    async fn remove_many_and_clear_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.vectors.bin");
        {
            let idx = FlatVectorIndex::open(path.clone());
            idx.remove_many(["nothing"]).unwrap();
            assert!(!path.exists());
            let vectors = HashMap::from([
                ("a".to_string(), vec![1.0, 0.0]),
                ("b".to_string(), vec![0.0, 1.0]),
                ("c".to_string(), vec![1.0, 1.0]),
            ]);
            idx.build(vectors).await.unwrap();
            assert_eq!(idx.remove_many(["a", "missing"]).unwrap(), 1);
        }
        let idx = FlatVectorIndex::open(path.clone());
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.clear().unwrap(), 2);
        assert!(FlatVectorIndex::open(path).is_empty());
    }
}

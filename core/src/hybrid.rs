//! Boolean filtering composed with semantic similarity.
//!
//! Lexical and semantic scores live on different scales, so `hybrid_search`
//! hands both lists back side by side instead of fusing them. Every call to
//! an external collaborator is timeout-bound; when one fails the
//! lexical-first operations fall back to lexical-only results and set
//! `degraded`.

use crate::config::HybridConfig;
use crate::error::{Error, Result};
use crate::ranking::{ScoredDoc, SearchHit};
use crate::semantic::{cosine_similarity, EmbeddingProvider, VectorIndex};
use crate::store::TextIndex;
use crate::tokenizer::tokenize;
use crate::{ranking, DocId};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HybridResults {
    pub lexical: Vec<SearchHit>,
    pub semantic: Vec<SearchHit>,
    /// true when the semantic half could not be computed
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedResults {
    pub results: Vec<SearchHit>,
    pub degraded: bool,
}

pub struct HybridSearcher {
    text: Arc<TextIndex>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: HybridConfig,
}

impl HybridSearcher {
    pub fn new(
        text: Arc<TextIndex>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: HybridConfig,
    ) -> Self {
        Self { text, vectors, embedder, config }
    }

    pub fn config(&self) -> &HybridConfig { &self.config }

    /// Run `fut` under the upstream timeout, mapping every failure to
    /// [`Error::Upstream`].
    async fn upstream<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.upstream_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::Upstream(msg))) => Err(Error::Upstream(format!("{what}: {msg}"))),
            Ok(Err(err)) => Err(Error::Upstream(format!("{what}: {err}"))),
            Err(_) => Err(Error::Upstream(format!(
                "{what} timed out after {:?}",
                self.config.upstream_timeout
            ))),
        }
    }

    /// Embed and store vectors for `records`, one batch call.
    ///
    /// On failure every vector previously stored for these ids is dropped, so
    /// a replaced text is never ranked with its old embedding.
    pub async fn index_documents(&self, records: &[(DocId, String)]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        match self.embed_and_store(records).await {
            Ok(count) => Ok(count),
            Err(err) => {
                self.drop_stale_vectors(records).await;
                Err(err)
            }
        }
    }

    async fn embed_and_store(&self, records: &[(DocId, String)]) -> Result<usize> {
        let texts: Vec<String> = records.iter().map(|(_, text)| text.clone()).collect();
        let vectors = self.upstream("embedding batch", self.embedder.embed_batch(&texts)).await?;
        if vectors.len() != records.len() {
            return Err(Error::Upstream(format!(
                "embedding provider returned {} vectors for {} texts",
                vectors.len(),
                records.len()
            )));
        }
        for ((id, _), vector) in records.iter().zip(vectors) {
            self.upstream("vector upsert", self.vectors.upsert(id, vector)).await?;
        }
        tracing::info!(index = %self.text.name(), count = records.len(), "embedded documents");
        Ok(records.len())
    }

    async fn drop_stale_vectors(&self, records: &[(DocId, String)]) {
        let mut dropped = 0usize;
        for (id, _) in records {
            match self.remove_document(id).await {
                Ok(true) => dropped += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(index = %self.text.name(), doc_id = %id, error = %err, "could not drop stale vector");
                }
            }
        }
        if dropped > 0 {
            tracing::warn!(index = %self.text.name(), dropped, "dropped vectors of re-indexed documents that could not be embedded");
        }
    }

    /// Drop the stored vector for `id`. Missing vectors are not an error.
    pub async fn remove_document(&self, id: &str) -> Result<bool> {
        self.upstream("vector remove", self.vectors.remove(id)).await
    }

    /// Boolean results and an independent nearest-neighbor query, unmerged.
    pub async fn hybrid_search(&self, query: &str, top_k: usize) -> HybridResults {
        if tokenize(query).is_empty() {
            return HybridResults::default();
        }
        let lexical = self.text.boolean_search(query);
        match self.nearest(query, top_k).await {
            Ok(semantic) => HybridResults { lexical, semantic, degraded: false },
            Err(err) => {
                tracing::warn!(index = %self.text.name(), error = %err, "semantic half unavailable, returning lexical results only");
                HybridResults { lexical, semantic: Vec::new(), degraded: true }
            }
        }
    }

    /// Semantic ranking over the whole corpus. Upstream failures are returned
    /// to the caller (they are retryable).
    pub async fn similarity_rank_all(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if tokenize(query).is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        self.nearest(query, top_k).await
    }

    async fn nearest(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let query_vec = self.upstream("query embedding", self.embedder.embed(query)).await?;
        let neighbors = self.upstream("vector query", self.vectors.query(&query_vec, top_k)).await?;
        Ok(neighbors
            .into_iter()
            .filter_map(|(id, score)| match self.text.get_document(&id) {
                Some(text) => Some(SearchHit { id, text, score: Some(f64::from(score)) }),
                None => {
                    tracing::warn!(index = %self.text.name(), doc_id = %id, "vector hit has no indexed text, dropping");
                    None
                }
            })
            .collect())
    }

    /// Boolean filter first, then cosine similarity over the survivors only.
    ///
    /// Falls back to boolean-then-TF-IDF when the embedding provider or the
    /// vector index is unavailable.
    pub async fn boolean_then_semantic_rank(&self, query: &str, top_k: usize) -> RankedResults {
        if tokenize(query).is_empty() || top_k == 0 {
            return RankedResults::default();
        }
        let candidates = self.text.boolean_filter(query);
        if candidates.is_empty() {
            return RankedResults::default();
        }
        match self.rank_candidates(query, candidates.into_iter().collect(), top_k).await {
            Ok(results) => RankedResults { results, degraded: false },
            Err(err) => {
                tracing::warn!(index = %self.text.name(), error = %err, "semantic rerank unavailable, falling back to lexical ranking");
                let mut results = self.text.boolean_tfidf_search(query);
                results.truncate(top_k);
                RankedResults { results, degraded: true }
            }
        }
    }

    async fn rank_candidates(&self, query: &str, candidates: Vec<DocId>, top_k: usize) -> Result<Vec<SearchHit>> {
        let query_vec = self.upstream("query embedding", self.embedder.embed(query)).await?;
        let mut texts: HashMap<DocId, String> = HashMap::new();
        let mut scored: Vec<ScoredDoc> = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(text) = self.text.get_document(&id) else {
                tracing::warn!(index = %self.text.name(), doc_id = %id, "candidate has no text, dropping");
                continue;
            };
            let Some(vector) = self.upstream("vector lookup", self.vectors.vector(&id)).await? else {
                tracing::warn!(index = %self.text.name(), doc_id = %id, "candidate has no embedding, dropping");
                continue;
            };
            let score = f64::from(cosine_similarity(&query_vec, &vector));
            scored.push(ScoredDoc { id: id.clone(), score });
            texts.insert(id, text);
        }
        ranking::sort_by_score(&mut scored);
        scored.truncate(top_k);
        Ok(scored
            .into_iter()
            .filter_map(|doc| {
                let text = texts.remove(&doc.id)?;
                Some(SearchHit { id: doc.id, text, score: Some(doc.score) })
            })
            .collect())
    }
}

use crate::ranking::Bm25Params;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fuzzy matcher defaults applied by [`TextIndex::fuzzy_search`].
///
/// [`TextIndex::fuzzy_search`]: crate::TextIndex::fuzzy_search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuzzyConfig {
    /// vocabulary terms considered per query token
    pub max_candidates: usize,
    /// minimum normalized edit similarity
    pub cutoff: f64,
}

impl Default for FuzzyConfig {
    fn default() -> Self { Self { max_candidates: 5, cutoff: 0.8 } }
}

/// Per-index scoring configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub bm25: Bm25Params,
    pub fuzzy: FuzzyConfig,
}

/// Settings for the hybrid orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridConfig {
    /// Result count used when the caller does not pass one
    pub top_k: usize,
    /// Upper bound on any single embedding / vector index call
    pub upstream_timeout: Duration,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self { top_k: 5, upstream_timeout: Duration::from_secs(10) }
    }
}

impl HybridConfig {
    pub fn with_timeout(upstream_timeout: Duration) -> Self {
        Self { upstream_timeout, ..Default::default() }
    }
}

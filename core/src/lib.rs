//! Lexical and hybrid text search over a persisted inverted index.
//!
//! [`TextIndex`] is the unit of state: an [`InvertedIndex`] plus its
//! [`QueryCache`], saved to disk after every mutation. [`IndexRegistry`] owns
//! all indexes of a process, and [`HybridSearcher`] layers semantic
//! reranking from external [`EmbeddingProvider`] / [`VectorIndex`]
//! collaborators on top of boolean filtering.

pub mod cache;
pub mod config;
pub mod error;
pub mod fuzzy;
pub mod hybrid;
pub mod index;
pub mod persist;
pub mod ranking;
pub mod registry;
pub mod semantic;
pub mod source;
pub mod store;
pub mod tokenizer;

pub use cache::QueryCache;
pub use config::{FuzzyConfig, HybridConfig, IndexConfig};
pub use error::{Error, Result};
pub use hybrid::{HybridResults, HybridSearcher, RankedResults};
pub use index::{DocId, InvertedIndex};
pub use ranking::{Bm25Params, ScoredDoc, Scorer, SearchHit};
pub use registry::{IndexHandle, IndexRegistry};
pub use semantic::{EmbeddingProvider, FlatVectorIndex, VectorIndex};
pub use source::{DataSource, JsonRecordSource, RecordQuery};
pub use store::{IndexStats, TextIndex};

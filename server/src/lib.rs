pub mod embedding;
pub mod error;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use textsearch_core::{
    DataSource, DocId, EmbeddingProvider, Error, HybridConfig, HybridSearcher, IndexConfig, IndexHandle,
    IndexRegistry, IndexStats, JsonRecordSource, RecordQuery, SearchHit, TextIndex,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use embedding::{HttpEmbeddingProvider, UnavailableEmbedder};
pub use error::ApiError;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Startup settings, filled from the command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    /// Root of the JSON record tables that `POST /indexes` may read from
    pub records_dir: Option<PathBuf>,
    pub embedding_url: Option<String>,
    pub upstream_timeout: Duration,
    pub admin_token: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<IndexRegistry>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub data_source: Option<Arc<dyn DataSource>>,
    pub hybrid: HybridConfig,
    pub admin_token: Option<String>,
}

impl AppState {
    fn index(&self, index_id: &str) -> ApiResult<IndexHandle> {
        Ok(self.registry.get(index_id)?)
    }

    fn searcher(&self, handle: IndexHandle) -> HybridSearcher {
        HybridSearcher::new(handle.text, handle.vectors, self.embedder.clone(), self.hybrid)
    }
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default, alias = "q")]
    pub query: String,
    #[serde(default, alias = "k")]
    pub top_k: Option<usize>,
    /// fuzzy only
    #[serde(default)]
    pub cutoff: Option<f64>,
    /// fuzzy only
    #[serde(default)]
    pub max_candidates: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct HybridResponse {
    pub query: String,
    pub took_s: f64,
    pub degraded: bool,
    pub lexical: Vec<SearchHit>,
    pub semantic: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInput {
    pub id: DocId,
    pub text: String,
}

#[derive(Deserialize)]
pub struct CreateIndexRequest {
    pub index_id: String,
    #[serde(default)]
    pub documents: Vec<DocumentInput>,
    /// Pull records from the configured JSON record source
    #[serde(default)]
    pub source: Option<RecordQuery>,
}

#[derive(Deserialize)]
pub struct AddDocumentsRequest {
    pub documents: Vec<DocumentInput>,
}

#[derive(Serialize)]
pub struct IndexResponse {
    pub index_id: String,
    pub added: usize,
    pub embedded: usize,
    pub stats: IndexStats,
}

pub fn build_app(config: ServerConfig) -> Result<Router> {
    let registry = IndexRegistry::new(&config.data_dir, IndexConfig::default())?;
    registry.open_existing()?;

    let embedder: Arc<dyn EmbeddingProvider> = match &config.embedding_url {
        Some(url) => Arc::new(HttpEmbeddingProvider::new(url, config.upstream_timeout)?),
        None => {
            tracing::info!("no embedding endpoint configured, semantic search disabled");
            Arc::new(UnavailableEmbedder)
        }
    };
    let data_source = config
        .records_dir
        .as_ref()
        .map(|dir| Arc::new(JsonRecordSource::new(dir)) as Arc<dyn DataSource>);

    let state = AppState {
        registry: Arc::new(registry),
        embedder,
        data_source,
        hybrid: HybridConfig::with_timeout(config.upstream_timeout),
        admin_token: config.admin_token,
    };
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/indexes", get(list_indexes).post(create_index))
        .route("/indexes/:index_id", get(index_stats).delete(drop_index))
        .route("/indexes/:index_id/documents", post(add_documents))
        .route("/indexes/:index_id/documents/:doc_id", get(get_document).delete(remove_document))
        .route("/indexes/:index_id/exact", get(exact_search))
        .route("/indexes/:index_id/ranked_naive", get(ranked_search))
        .route("/indexes/:index_id/full_text", get(full_text_search))
        .route("/indexes/:index_id/boolean_ranked", get(boolean_ranked_search))
        .route("/indexes/:index_id/boolean_bm25", get(boolean_bm25_search))
        .route("/indexes/:index_id/fuzzy", get(fuzzy_search))
        .route("/indexes/:index_id/similarity", get(similarity_search))
        .route("/indexes/:index_id/exact_similarity", get(exact_similarity_search))
        .route("/indexes/:index_id/hybrid", get(hybrid_search))
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

// CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
fn cors_layer() -> CorsLayer {
    let origins: Vec<_> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

// ---- lexical search ----

fn lexical<F>(state: &AppState, index_id: &str, params: SearchParams, search: F) -> ApiResult<Json<SearchResponse>>
where
    F: FnOnce(&TextIndex, &SearchParams) -> textsearch_core::Result<Vec<SearchHit>>,
{
    let start = Instant::now();
    let handle = state.index(index_id)?;
    let mut results = search(&*handle.text, &params)?;
    let total_hits = results.len();
    if let Some(k) = params.top_k {
        results.truncate(k);
    }
    Ok(Json(SearchResponse {
        query: params.query,
        took_s: start.elapsed().as_secs_f64(),
        total_hits,
        degraded: false,
        results,
    }))
}

pub async fn exact_search(State(state): State<AppState>, Path(index_id): Path<String>, Query(params): Query<SearchParams>) -> ApiResult<Json<SearchResponse>> {
    lexical(&state, &index_id, params, |text, p| Ok(text.boolean_search(&p.query)))
}

pub async fn ranked_search(State(state): State<AppState>, Path(index_id): Path<String>, Query(params): Query<SearchParams>) -> ApiResult<Json<SearchResponse>> {
    lexical(&state, &index_id, params, |text, p| Ok(text.tfidf_search(&p.query)))
}

pub async fn full_text_search(State(state): State<AppState>, Path(index_id): Path<String>, Query(params): Query<SearchParams>) -> ApiResult<Json<SearchResponse>> {
    lexical(&state, &index_id, params, |text, p| Ok(text.bm25_search(&p.query)))
}

pub async fn boolean_ranked_search(State(state): State<AppState>, Path(index_id): Path<String>, Query(params): Query<SearchParams>) -> ApiResult<Json<SearchResponse>> {
    lexical(&state, &index_id, params, |text, p| Ok(text.boolean_tfidf_search(&p.query)))
}

pub async fn boolean_bm25_search(State(state): State<AppState>, Path(index_id): Path<String>, Query(params): Query<SearchParams>) -> ApiResult<Json<SearchResponse>> {
    lexical(&state, &index_id, params, |text, p| Ok(text.boolean_bm25_search(&p.query)))
}

pub async fn fuzzy_search(State(state): State<AppState>, Path(index_id): Path<String>, Query(params): Query<SearchParams>) -> ApiResult<Json<SearchResponse>> {
    lexical(&state, &index_id, params, |text, p| {
        let defaults = text.config().fuzzy;
        text.fuzzy_search_with(
            &p.query,
            p.max_candidates.unwrap_or(defaults.max_candidates),
            p.cutoff.unwrap_or(defaults.cutoff),
        )
    })
}

// ---- semantic search ----

pub async fn similarity_search(State(state): State<AppState>, Path(index_id): Path<String>, Query(params): Query<SearchParams>) -> ApiResult<Json<SearchResponse>> {
    let start = Instant::now();
    let searcher = state.searcher(state.index(&index_id)?);
    let top_k = params.top_k.unwrap_or(state.hybrid.top_k);
    let results = searcher.similarity_rank_all(&params.query, top_k).await?;
    Ok(Json(SearchResponse {
        query: params.query,
        took_s: start.elapsed().as_secs_f64(),
        total_hits: results.len(),
        degraded: false,
        results,
    }))
}

pub async fn exact_similarity_search(State(state): State<AppState>, Path(index_id): Path<String>, Query(params): Query<SearchParams>) -> ApiResult<Json<SearchResponse>> {
    let start = Instant::now();
    let searcher = state.searcher(state.index(&index_id)?);
    let top_k = params.top_k.unwrap_or(state.hybrid.top_k);
    let ranked = searcher.boolean_then_semantic_rank(&params.query, top_k).await;
    Ok(Json(SearchResponse {
        query: params.query,
        took_s: start.elapsed().as_secs_f64(),
        total_hits: ranked.results.len(),
        degraded: ranked.degraded,
        results: ranked.results,
    }))
}

pub async fn hybrid_search(State(state): State<AppState>, Path(index_id): Path<String>, Query(params): Query<SearchParams>) -> ApiResult<Json<HybridResponse>> {
    let start = Instant::now();
    let searcher = state.searcher(state.index(&index_id)?);
    let top_k = params.top_k.unwrap_or(state.hybrid.top_k);
    let res = searcher.hybrid_search(&params.query, top_k).await;
    Ok(Json(HybridResponse {
        query: params.query,
        took_s: start.elapsed().as_secs_f64(),
        degraded: res.degraded,
        lexical: res.lexical,
        semantic: res.semantic,
    }))
}

// ---- index management ----

pub async fn list_indexes(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "indexes": state.registry.ids() }))
}

pub async fn index_stats(State(state): State<AppState>, Path(index_id): Path<String>) -> ApiResult<Json<IndexStats>> {
    Ok(Json(state.index(&index_id)?.text.stats()))
}

pub async fn create_index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateIndexRequest>,
) -> ApiResult<(StatusCode, Json<IndexResponse>)> {
    authorize(&state, &headers)?;
    let mut records: Vec<(DocId, String)> = req.documents.into_iter().map(|d| (d.id, d.text)).collect();
    if let Some(query) = &req.source {
        let source = state
            .data_source
            .as_ref()
            .ok_or_else(|| Error::Validation("no record source configured on this server".into()))?;
        records.extend(source.fetch_text_records(query)?);
    }
    let handle = state.registry.create(&req.index_id)?;
    let response = ingest(&state, &req.index_id, handle, records).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn add_documents(
    State(state): State<AppState>,
    Path(index_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AddDocumentsRequest>,
) -> ApiResult<Json<IndexResponse>> {
    authorize(&state, &headers)?;
    let handle = state.index(&index_id)?;
    let records = req.documents.into_iter().map(|d| (d.id, d.text)).collect();
    Ok(Json(ingest(&state, &index_id, handle, records).await?))
}

/// Lexical indexing is authoritative; embedding failures are logged and
/// reported as `embedded: 0`.
async fn ingest(state: &AppState, index_id: &str, handle: IndexHandle, records: Vec<(DocId, String)>) -> ApiResult<IndexResponse> {
    let added = handle.text.add_documents(records.iter().map(|(id, text)| (id, text)))?;
    let stats = handle.text.stats();
    let records: Vec<(DocId, String)> = records.into_iter().filter(|(id, _)| !id.is_empty()).collect();
    let embedded = match state.searcher(handle).index_documents(&records).await {
        Ok(n) => n,
        Err(err) => {
            tracing::warn!(index = index_id, error = %err, "documents indexed without embeddings");
            0
        }
    };
    Ok(IndexResponse { index_id: index_id.to_string(), added, embedded, stats })
}

pub async fn drop_index(State(state): State<AppState>, Path(index_id): Path<String>, headers: HeaderMap) -> ApiResult<StatusCode> {
    authorize(&state, &headers)?;
    state.registry.drop_index(&index_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_document(State(state): State<AppState>, Path((index_id, doc_id)): Path<(String, String)>) -> ApiResult<Json<SearchHit>> {
    let handle = state.index(&index_id)?;
    let text = handle
        .text
        .get_document(&doc_id)
        .ok_or_else(|| Error::NotFound(format!("document {doc_id:?} in index {index_id:?}")))?;
    Ok(Json(SearchHit { id: doc_id, text, score: None }))
}

pub async fn remove_document(
    State(state): State<AppState>,
    Path((index_id, doc_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    authorize(&state, &headers)?;
    let handle = state.index(&index_id)?;
    handle.text.remove_document(&doc_id)?;
    if let Err(err) = state.searcher(handle).remove_document(&doc_id).await {
        tracing::warn!(index = %index_id, doc_id = %doc_id, error = %err, "stale vector left behind");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Mutating routes require `X-ADMIN-TOKEN` when an admin token is configured.
fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(required) = &state.admin_token else { return Ok(()) };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid admin token".into()))
    }
}

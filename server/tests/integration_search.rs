use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use server::{router, AppState, UnavailableEmbedder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use textsearch_core::{EmbeddingProvider, Error, HybridConfig, IndexConfig, IndexRegistry, Result};

/// Scores fruit words on the first axis, vehicles on the second.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32, 0.0];
        for word in text.split_whitespace() {
            match word {
                "apple" => v[0] += 1.0,
                "car" => v[1] += 1.0,
                "red" | "green" => v[0] += 0.5,
                _ => {}
            }
        }
        Ok(v)
    }
}

/// [`KeywordEmbedder`] that can be switched off.
struct FlakyEmbedder {
    up: AtomicBool,
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(Error::Upstream("embedding service unavailable".into()));
        }
        KeywordEmbedder.embed(text).await
    }
}

fn app(dir: &std::path::Path, embedder: Arc<dyn EmbeddingProvider>, admin_token: Option<&str>) -> Router {
    let registry = IndexRegistry::new(dir, IndexConfig::default()).unwrap();
    router(AppState {
        registry: Arc::new(registry),
        embedder,
        data_source: None,
        hybrid: HybridConfig::with_timeout(Duration::from_secs(2)),
        admin_token: admin_token.map(str::to_string),
    })
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = tower::ServiceExt::oneshot(app.clone(), req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    call(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn create_fruit(app: &Router) -> (StatusCode, Value) {
    let body = json!({
        "index_id": "fruit",
        "documents": [
            {"id": "1", "text": "red apple"},
            {"id": "2", "text": "green apple"},
            {"id": "3", "text": "red car"}
        ]
    });
    let req = Request::post("/indexes")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    call(app, req).await
}

fn result_ids(json: &Value) -> Vec<String> {
    json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn lexical_search_routes() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), Arc::new(UnavailableEmbedder), None);

    let (status, created) = create_fruit(&app).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["added"], 3);
    assert_eq!(created["embedded"], 0);

    let (status, json) = get(&app, "/indexes/fruit/exact?query=red%20apple").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result_ids(&json), vec!["1"]);
    assert!(json["results"][0].get("score").is_none());

    let (_, json) = get(&app, "/indexes/fruit/ranked_naive?query=apple").await;
    assert_eq!(result_ids(&json), vec!["1", "2"]);
    assert_eq!(json["results"][0]["score"], json["results"][1]["score"]);

    let (_, json) = get(&app, "/indexes/fruit/full_text?q=red&top_k=1").await;
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
    assert_eq!(json["total_hits"], 2);

    let (_, json) = get(&app, "/indexes/fruit/boolean_bm25?query=red%20car").await;
    assert_eq!(result_ids(&json), vec!["3"]);

    let (_, json) = get(&app, "/indexes/fruit/boolean_ranked?query=apple").await;
    assert_eq!(result_ids(&json), vec!["1", "2"]);

    let (_, json) = get(&app, "/indexes/fruit/fuzzy?query=aple&cutoff=0.7").await;
    assert_eq!(result_ids(&json), vec!["1", "2"]);

    let (status, _) = get(&app, "/indexes/fruit/fuzzy?query=aple&cutoff=1.5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, json) = get(&app, "/indexes/fruit/exact").await;
    assert!(json["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn management_routes() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), Arc::new(UnavailableEmbedder), None);
    create_fruit(&app).await;

    let (status, json) = get(&app, "/indexes/fruit").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["documents"], 3);

    let (_, json) = get(&app, "/indexes").await;
    assert_eq!(json["indexes"], json!(["fruit"]));

    let (status, json) = get(&app, "/indexes/fruit/documents/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["text"], "green apple");

    let req = Request::post("/indexes/fruit/documents")
        .header("content-type", "application/json")
        .body(Body::from(json!({"documents": [{"id": "4", "text": "green car"}]}).to_string()))
        .unwrap();
    let (status, json) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stats"]["documents"], 4);

    let req = Request::delete("/indexes/fruit/documents/2").body(Body::empty()).unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = get(&app, "/indexes/fruit/documents/2").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, json) = get(&app, "/indexes/fruit/exact?query=green").await;
    assert_eq!(result_ids(&json), vec!["4"]);

    let req = Request::delete("/indexes/fruit").body(Body::empty()).unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, json) = get(&app, "/indexes/fruit/exact?query=red").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn rejects_unknown_and_invalid_indexes() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), Arc::new(UnavailableEmbedder), None);

    let (status, _) = get(&app, "/indexes/nope/ranked_naive?query=apple").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let req = Request::post("/indexes")
        .header("content-type", "application/json")
        .body(Body::from(json!({"index_id": "../escape"}).to_string()))
        .unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::post("/indexes")
        .header("content-type", "application/json")
        .body(Body::from(json!({"index_id": "db", "source": {"table": "t", "text_columns": ["a"], "id_column": "id"}}).to_string()))
        .unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn semantic_routes_use_embeddings() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), Arc::new(KeywordEmbedder), None);
    let (_, created) = create_fruit(&app).await;
    assert_eq!(created["embedded"], 3);

    let (status, json) = get(&app, "/indexes/fruit/similarity?query=apple&top_k=2").await;
    assert_eq!(status, StatusCode::OK);
    let mut ids = result_ids(&json);
    ids.sort();
    assert_eq!(ids, vec!["1", "2"]);

    let (_, json) = get(&app, "/indexes/fruit/exact_similarity?query=red").await;
    let mut ids = result_ids(&json);
    ids.sort();
    assert_eq!(ids, vec!["1", "3"]);
    assert!(json.get("degraded").is_none());

    let (_, json) = get(&app, "/indexes/fruit/hybrid?query=red%20apple&top_k=3").await;
    assert_eq!(json["degraded"], false);
    assert_eq!(json["lexical"][0]["id"], "1");
    assert!(!json["semantic"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn semantic_routes_degrade_without_embedder() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), Arc::new(UnavailableEmbedder), None);
    create_fruit(&app).await;

    let (status, json) = get(&app, "/indexes/fruit/hybrid?query=apple").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["degraded"], true);
    assert!(json["semantic"].as_array().unwrap().is_empty());
    assert_eq!(json["lexical"].as_array().unwrap().len(), 2);

    let (status, json) = get(&app, "/indexes/fruit/exact_similarity?query=apple").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["degraded"], true);
    assert_eq!(result_ids(&json), vec!["1", "2"]);

    let (status, json) = get(&app, "/indexes/fruit/similarity?query=apple").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["retryable"], true);
}

#[tokio::test]
async fn admin_token_guards_mutations() {
    let dir = tempdir().unwrap();
    let app = app(dir.path(), Arc::new(UnavailableEmbedder), Some("s3cret"));

    let (status, _) = create_fruit(&app).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::post("/indexes")
        .header("content-type", "application/json")
        .header("X-ADMIN-TOKEN", "s3cret")
        .body(Body::from(json!({"index_id": "fruit", "documents": [{"id": "1", "text": "red apple"}]}).to_string()))
        .unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);

    // reads stay open
    let (status, _) = get(&app, "/indexes/fruit/exact?query=apple").await;
    assert_eq!(status, StatusCode::OK);
}

async fn add_docs(app: &Router, index_id: &str, docs: Value) -> (StatusCode, Value) {
    let req = Request::post(format!("/indexes/{index_id}/documents"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "documents": docs }).to_string()))
        .unwrap();
    call(app, req).await
}

#[tokio::test]
async fn replaced_text_is_not_ranked_with_its_old_embedding() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(FlakyEmbedder { up: AtomicBool::new(true) });
    let app = app(dir.path(), embedder.clone(), None);

    let req = Request::post("/indexes")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"index_id": "mixed", "documents": [
                {"id": "1", "text": "apple shared"},
                {"id": "2", "text": "car shared"}
            ]})
            .to_string(),
        ))
        .unwrap();
    let (_, created) = call(&app, req).await;
    assert_eq!(created["embedded"], 2);

    embedder.up.store(false, Ordering::SeqCst);
    let (status, json) = add_docs(&app, "mixed", json!([{"id": "1", "text": "car shared"}])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["embedded"], 0);

    embedder.up.store(true, Ordering::SeqCst);
    let (status, json) = get(&app, "/indexes/mixed/similarity?query=apple&top_k=1").await;
    assert_eq!(status, StatusCode::OK);
    // "1" lost its vector along with its old text; only "2" is left to rank
    assert_eq!(result_ids(&json), vec!["2"]);

    // re-adding with the embedder up restores the document
    let (_, json) = add_docs(&app, "mixed", json!([{"id": "1", "text": "apple shared"}])).await;
    assert_eq!(json["embedded"], 1);
    let (_, json) = get(&app, "/indexes/mixed/similarity?query=apple&top_k=1").await;
    assert_eq!(result_ids(&json), vec!["1"]);
}

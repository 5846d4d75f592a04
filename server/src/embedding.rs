use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use textsearch_core::{EmbeddingProvider, Error, Result};

/// Embedding provider reached over HTTP.
///
/// Sends `{"input": [texts]}` and expects `{"embeddings": [[f32]]}` back, one
/// vector per input.
pub struct HttpEmbeddingProvider {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

fn upstream(err: reqwest::Error) -> Error {
    Error::Upstream(err.to_string())
}

impl HttpEmbeddingProvider {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("textsearch-server/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url: url.to_string() })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| Error::Upstream("embedding response was empty".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let resp = self
            .client
            .post(&self.url)
            .json(&EmbedRequest { input: texts })
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?;
        let body: EmbedResponse = resp.json().await.map_err(upstream)?;
        if body.embeddings.len() != texts.len() {
            return Err(Error::Upstream(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        Ok(body.embeddings)
    }
}

/// Stand-in used when no embedding endpoint is configured. Semantic routes
/// fail with an upstream error; hybrid routes degrade to lexical results.
pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::Upstream("no embedding provider configured".into()))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Upstream("no embedding provider configured".into()))
    }
}

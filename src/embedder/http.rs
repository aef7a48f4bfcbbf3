/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};
use crate::config::EmbeddingConfig;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
            api_key,
        }
    }

    /// Build from config, reading the API key from `api_key_env`.
    ///
    /// Local OpenAI-compatible servers often need no key, so a missing
    /// variable is only an error once the server rejects the request.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::new(&config.base_url, &config.model, config.dimensions, api_key)
    }

    fn parse_response(
        &self,
        mut response: EmbeddingResponse,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if response.data.len() != expected {
            return Err(EmbedderError::MalformedResponse(format!(
                "expected {expected} embeddings, got {}",
                response.data.len()
            )));
        }
        // Sort by index to ensure order matches input
        response.data.sort_by_key(|d| d.index);
        let mut out = Vec::with_capacity(expected);
        for data in response.data {
            if data.embedding.len() != self.dimensions {
                return Err(EmbedderError::MalformedResponse(format!(
                    "embedding {} has {} dimensions, expected {}",
                    data.index,
                    data.embedding.len(),
                    self.dimensions
                )));
            }
            out.push(data.embedding);
        }
        Ok(out)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedderError::MalformedResponse("no embedding returned".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        debug!("POST {url} ({} texts)", texts.len());

        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedderError::InferenceFailed(format!(
                "API error {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedderError::MalformedResponse(e.to_string()))?;
        self.parse_response(parsed, texts.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

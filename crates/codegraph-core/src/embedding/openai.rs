//! OpenAI-compatible embedding provider.

use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingService;
use crate::errors::{GraphError, GraphResult};

pub struct OpenAiEmbeddings {
    api_key: String,
    model: String,
    dimensions: usize,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: &str, model: &str, dimensions: usize, base_url: &str, timeout: Duration) -> GraphResult<Self> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimensions,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// `None` when the configured key env var is unset.
    pub fn from_config(config: &EmbeddingConfig) -> GraphResult<Option<Self>> {
        let Some(key) = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        Self::new(
            &key,
            &config.model,
            config.dimensions,
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        // text-embedding-3-* supports custom dimensions
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dimensions);
        }
        body
    }
}

/// Vectors from an `/embeddings` response, ordered by their `index`.
pub fn parse_embeddings(json: &serde_json::Value) -> GraphResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GraphError::Embedding("missing data in embedding response".into()))?;
    let mut rows: Vec<(u64, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vector = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| GraphError::Embedding("missing embedding in response item".into()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        let index = item.get("index").and_then(|i| i.as_u64()).unwrap_or(pos as u64);
        rows.push((index, vector));
    }
    rows.sort_by_key(|(i, _)| *i);
    Ok(rows.into_iter().map(|(_, v)| v).collect())
}

impl EmbeddingService for OpenAiEmbeddings {
    fn embed_batch(&self, texts: &[String]) -> GraphResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(texts))
            .send()
            .map_err(|e| GraphError::Embedding(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(GraphError::Embedding(format!("provider returned status {status}: {body}")));
        }

        let json: serde_json::Value = response
            .json()
            .map_err(|e| GraphError::Embedding(format!("response parse error: {e}")))?;
        parse_embeddings(&json)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

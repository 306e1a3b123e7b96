//! OpenAI-compatible chat-completions oracle.
//!
//! Works with OpenAI and any server exposing `/chat/completions` with
//! JSON-object response format.

use std::time::Duration;

use crate::config::EnrichmentConfig;
use crate::enrichment::model::{Enrichment, EnrichmentRequest};
use crate::enrichment::prompts::{build_prompt, system_prompt};
use crate::enrichment::EnrichmentOracle;
use crate::errors::{GraphError, GraphResult};

pub struct OpenAiOracle {
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: String,
    client: reqwest::blocking::Client,
}

impl OpenAiOracle {
    pub fn new(api_key: &str, model: &str, base_url: &str, timeout: Duration) -> GraphResult<Self> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            system_prompt: system_prompt(),
            client,
        })
    }

    /// Build from config, reading the key from the configured env var.
    /// Returns `None` when no key is set.
    pub fn from_config(config: &EnrichmentConfig) -> GraphResult<Option<Self>> {
        let Some(key) = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        Self::new(
            &key,
            &config.model,
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": prompt}
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.0,
        })
    }
}

/// Pull the assistant message out of a chat-completions response and parse
/// it as an annotation.
pub fn parse_completion(json: &serde_json::Value) -> GraphResult<Enrichment> {
    let content = json
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| GraphError::Oracle("missing message content in completion".into()))?;
    serde_json::from_str(content.trim())
        .map_err(|e| GraphError::Oracle(format!("completion is not a valid annotation: {e}")))
}

impl EnrichmentOracle for OpenAiOracle {
    fn enrich(&self, request: &EnrichmentRequest) -> GraphResult<Enrichment> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&build_prompt(request));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .map_err(|e| GraphError::Oracle(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(GraphError::Oracle(format!("oracle returned status {status}: {text}")));
        }

        let json: serde_json::Value = response
            .json()
            .map_err(|e| GraphError::Oracle(format!("response parse error: {e}")))?;
        Ok(parse_completion(&json)?.normalized(request.kind))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_reads_json_content() {
        let response = serde_json::json!({
            "choices": [{"message": {"content": "{\"purpose\": \"Adds.\", \"complexity\": \"low\"}"}}]
        });
        let e = parse_completion(&response).unwrap();
        assert_eq!(e.purpose, "Adds.");
        assert_eq!(e.complexity.as_deref(), Some("low"));
    }

    #[test]
    fn test_parse_completion_rejects_missing_or_bad_content() {
        assert!(matches!(
            parse_completion(&serde_json::json!({"choices": []})),
            Err(GraphError::Oracle(_))
        ));
        let bad = serde_json::json!({"choices": [{"message": {"content": "not json"}}]});
        assert!(matches!(parse_completion(&bad), Err(GraphError::Oracle(_))));
    }

    #[test]
    fn test_request_body_uses_json_mode() {
        let oracle = OpenAiOracle::new("k", "m", "http://localhost:1/v1/", Duration::from_secs(1)).unwrap();
        assert_eq!(oracle.base_url, "http://localhost:1/v1");
        let body = oracle.request_body("hi");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][1]["content"], "hi");
    }
}

// PawMatch Engine — Embedding Client
//
// Calls Ollama or OpenAI-compatible embedding APIs to produce vector
// representations of text. Used by the semantic cache's approximate tier.

use crate::atoms::error::EngineResult;
use crate::engine::config::EmbeddingConfig;
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

// ── Trait seam ─────────────────────────────────────────────────────────

/// Maps text to a fixed-dimension vector.  The cache holds this as a trait
/// object so tests can supply deterministic fakes.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
}

// ── HTTP client ────────────────────────────────────────────────────────

/// Embedding client — calls Ollama or an OpenAI-compatible embedding API.
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Self {
        EmbeddingClient {
            client: Client::new(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn vec_from_value(value: &Value) -> Vec<f32> {
        value
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ollama current API: POST /api/embed { model, input } → { embeddings: [[f32...]] }
    /// Falls back to legacy: POST /api/embeddings { model, prompt } → { embedding: [f32...] }
    async fn embed_ollama(&self, text: &str) -> EngineResult<Vec<f32>> {
        // ── Try new /api/embed endpoint first (Ollama 0.4+) ──
        let new_url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let new_body = json!({
            "model": self.model,
            "input": text,
        });

        let new_result = self
            .client
            .post(&new_url)
            .json(&new_body)
            .timeout(self.timeout)
            .send()
            .await;

        if let Ok(resp) = new_result {
            if resp.status().is_success() {
                if let Ok(v) = resp.json::<Value>().await {
                    // New format returns { embeddings: [[f32...], ...] }
                    if let Some(first) = v["embeddings"].as_array().and_then(|e| e.first()) {
                        let vec = Self::vec_from_value(first);
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                    // Some Ollama versions return singular "embedding" even on /api/embed
                    let vec = Self::vec_from_value(&v["embedding"]);
                    if !vec.is_empty() {
                        return Ok(vec);
                    }
                }
            } else {
                info!(
                    "[embedding] /api/embed returned {} — trying legacy endpoint",
                    resp.status()
                );
            }
        }

        // ── Fall back to legacy /api/embeddings endpoint ──
        let legacy_url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let legacy_body = json!({
            "model": self.model,
            "prompt": text,
        });

        let resp = self
            .client
            .post(&legacy_url)
            .json(&legacy_body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                format!(
                    "Embedding service not reachable at {} — {}",
                    self.base_url, e
                )
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("Ollama embed {} — {}", status, text).into());
        }

        let v: Value = resp.json().await?;
        let vec = Self::vec_from_value(&v["embedding"]);
        if vec.is_empty() {
            return Err("Empty embedding vector from Ollama".into());
        }
        Ok(vec)
    }

    /// OpenAI-compatible format: POST /v1/embeddings { model, input }
    async fn embed_openai(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("OpenAI embed {} — {}", status, text).into());
        }

        let v: Value = resp.json().await?;
        let vec = Self::vec_from_value(&v["data"][0]["embedding"]);
        if vec.is_empty() {
            return Err("Empty embedding vector from OpenAI format".into());
        }
        Ok(vec)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    /// Get an embedding vector for a text string.
    /// Tries the Ollama API format first, falls back to OpenAI format.
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let ollama_result = self.embed_ollama(text).await;
        if let Ok(vec) = ollama_result {
            return Ok(vec);
        }
        let ollama_err = ollama_result.unwrap_err();

        let openai_result = self.embed_openai(text).await;
        if let Ok(vec) = openai_result {
            return Ok(vec);
        }

        Err(format!(
            "Embedding failed. Ollama: {} | OpenAI: {}",
            ollama_err,
            openai_result.unwrap_err()
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_from_value_parses_numbers() {
        let v = json!([0.5, -1.0, 2.25]);
        assert_eq!(EmbeddingClient::vec_from_value(&v), vec![0.5, -1.0, 2.25]);
    }

    #[test]
    fn vec_from_value_empty_for_non_array() {
        assert!(EmbeddingClient::vec_from_value(&json!("nope")).is_empty());
        assert!(EmbeddingClient::vec_from_value(&Value::Null).is_empty());
    }
}

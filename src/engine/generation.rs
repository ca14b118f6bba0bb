// PawMatch Engine — Generation Capability Client
// Direct HTTP calls to an OpenAI-compatible chat-completions API.
// The engine only ever needs a full completion per call — no streaming.
//
// The `TextGenerator` trait is the seam: routing, extraction, selection, and
// the post-result handler all take `&dyn TextGenerator`, so tests inject
// scripted fakes and never touch the network.

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::config::GenerationConfig;
use crate::engine::types::{ChatRole, GenerationPrompt};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Retry configuration for transient API errors.
const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 1000;

/// Check if an HTTP status code should be retried.
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 529)
}

/// Sleep with exponential backoff. Returns the delay used.
async fn retry_delay(attempt: u32) -> Duration {
    let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
    tokio::time::sleep(delay).await;
    delay
}

// ── Trait seam ─────────────────────────────────────────────────────────

/// The narrow contract this engine holds against the text-generation
/// capability: prompt in, full text out.  Structured decisions are plain
/// completions parsed with `extract_json_block`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &GenerationPrompt) -> EngineResult<String>;
}

// ── OpenAI-compatible client ───────────────────────────────────────────
// Works for: OpenAI, OpenRouter, Ollama, any OpenAI-compatible API.

pub struct GenerationClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(config: &GenerationConfig) -> Self {
        GenerationClient {
            client: Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn format_messages(prompt: &GenerationPrompt) -> Vec<Value> {
        let mut messages = Vec::new();
        if !prompt.system.is_empty() {
            messages.push(json!({"role": "system", "content": prompt.system}));
        }
        for turn in &prompt.history {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(json!({"role": role, "content": turn.content}));
        }
        messages.push(json!({"role": "user", "content": prompt.user}));
        messages
    }
}

#[async_trait]
impl TextGenerator for GenerationClient {
    async fn complete(&self, prompt: &GenerationPrompt) -> EngineResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": Self::format_messages(prompt),
            "temperature": self.temperature,
        });

        info!("[generation] Request to {} model={}", url, self.model);

        // Retry loop for transient errors
        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1).await;
                warn!(
                    "[generation] Retry {}/{} after {}ms",
                    attempt,
                    MAX_RETRIES,
                    delay.as_millis()
                );
            }

            let mut request = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .timeout(self.timeout)
                .json(&body);
            if !self.api_key.is_empty() {
                request = request.header("Authorization", format!("Bearer {}", self.api_key));
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("HTTP request failed: {}", e);
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(EngineError::generation(last_error));
                }
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body_text = response.text().await.unwrap_or_default();
                last_error = format!(
                    "API error {}: {}",
                    status,
                    &body_text[..body_text.len().min(200)]
                );
                if is_retryable_status(status) && attempt < MAX_RETRIES {
                    continue;
                }
                return Err(EngineError::generation(last_error));
            }

            let v: Value = response.json().await?;
            let content = v["choices"][0]["message"]["content"]
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    EngineError::MalformedOutput("no choices[0].message.content in response".into())
                })?;
            return Ok(content);
        }

        Err(EngineError::generation(last_error))
    }
}

// ── Structured-output extraction ───────────────────────────────────────

/// Pull the first well-formed JSON object out of a raw model response.
///
/// Models wrap structured payloads in prose, code fences, or trailing
/// commentary; assuming the whole response parses is a losing bet.  Scans
/// for the first `{`, tracks brace depth (string- and escape-aware), and
/// parses the first balanced block.
pub fn extract_json_block(raw: &str) -> Option<Value> {
    let bytes = raw.as_bytes();
    let start = raw.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let block = &raw[start..=i];
                    return serde_json::from_str(block).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ChatTurn;

    #[test]
    fn extracts_plain_object() {
        let v = extract_json_block(r#"{"flow": "qa"}"#).unwrap();
        assert_eq!(v["flow"], "qa");
    }

    #[test]
    fn extracts_object_wrapped_in_prose() {
        let raw = "Sure! Here is the decision:\n```json\n{\"action\": \"answer\", \"reply\": \"hi\"}\n```\nLet me know.";
        let v = extract_json_block(raw).unwrap();
        assert_eq!(v["action"], "answer");
    }

    #[test]
    fn handles_nested_objects_and_braces_in_strings() {
        let raw = r#"noise {"a": {"b": "contains } brace"}, "c": 1} trailing {"d": 2}"#;
        let v = extract_json_block(raw).unwrap();
        assert_eq!(v["c"], 1);
        assert_eq!(v["a"]["b"], "contains } brace");
    }

    #[test]
    fn handles_escaped_quotes() {
        let raw = r#"{"text": "she said \"hi}\" loudly"}"#;
        let v = extract_json_block(raw).unwrap();
        assert_eq!(v["text"], "she said \"hi}\" loudly");
    }

    #[test]
    fn none_when_no_object_present() {
        assert!(extract_json_block("no json here").is_none());
        assert!(extract_json_block("{unbalanced").is_none());
    }

    #[test]
    fn message_formatting_includes_history() {
        let prompt = GenerationPrompt::new("sys", "current question").with_history(
            &[
                ChatTurn {
                    role: ChatRole::User,
                    content: "older".into(),
                    created_at: String::new(),
                },
                ChatTurn {
                    role: ChatRole::Assistant,
                    content: "reply".into(),
                    created_at: String::new(),
                },
            ],
            10,
        );
        let messages = GenerationClient::format_messages(&prompt);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "current question");
    }

    #[test]
    fn history_limit_keeps_most_recent() {
        let turns: Vec<ChatTurn> = (0..5)
            .map(|i| ChatTurn {
                role: ChatRole::User,
                content: format!("t{}", i),
                created_at: String::new(),
            })
            .collect();
        let prompt = GenerationPrompt::new("s", "u").with_history(&turns, 2);
        assert_eq!(prompt.history.len(), 2);
        assert_eq!(prompt.history[0].content, "t3");
    }
}

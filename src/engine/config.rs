// PawMatch Engine — Configuration
// Typed config with documented defaults, persisted as JSON under a key in
// the engine_config table.  The engine never requires a config file on
// disk; the surrounding service seeds the store once and the engine loads
// from there.

use crate::atoms::constants::*;
use crate::atoms::error::EngineResult;
use crate::engine::store::MatchStore;
use serde::{Deserialize, Serialize};

const CONFIG_KEY: &str = "engine";

// ── Sections ───────────────────────────────────────────────────────────────

/// Generation capability endpoint (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    /// Per-request timeout, seconds.
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            base_url: "http://localhost:11434/v1".into(),
            api_key: String::new(),
            model: "llama3.1".into(),
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

/// Embedding endpoint (Ollama native, with OpenAI-compatible fallback).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            base_url: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum stored entries before batch eviction kicks in.
    pub max_entries: usize,
    /// Minimum cosine similarity for an approximate-tier hit (0.0–1.0).
    pub similarity_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_entries: CACHE_DEFAULT_MAX_ENTRIES,
            similarity_threshold: CACHE_DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Recommendations per result (at most 3 are ever presented).
    pub max_results: usize,
    /// Sessions idle past this are pruned together with their history.
    pub session_ttl_secs: i64,
    /// Stored history cap per session.
    pub max_stored_turns: i64,
    /// Recent turns included in prompt context.
    pub history_prompt_turns: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            max_results: MAX_RECOMMENDATIONS,
            session_ttl_secs: SESSION_DEFAULT_TTL_SECS,
            max_stored_turns: SESSION_MAX_STORED_TURNS,
            history_prompt_turns: HISTORY_PROMPT_TURNS,
        }
    }
}

// ── Top-level config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
    pub cache: CacheConfig,
    pub matching: MatchingConfig,
}

impl EngineConfig {
    /// Load from the store's KV table; defaults when absent or unparsable.
    pub fn load(store: &MatchStore) -> Self {
        match store.get_config(CONFIG_KEY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_default(),
            _ => EngineConfig::default(),
        }
    }

    /// Persist to the store's KV table.
    pub fn save(&self, store: &MatchStore) -> EngineResult<()> {
        let json = serde_json::to_string(self)?;
        store.set_config(CONFIG_KEY, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = EngineConfig::default();
        assert_eq!(c.cache.max_entries, 500);
        assert!((c.cache.similarity_threshold - 0.85).abs() < 1e-9);
        assert_eq!(c.matching.max_results, 3);
        assert_eq!(c.matching.session_ttl_secs, 86_400);
    }

    #[test]
    fn roundtrip_through_store() {
        let store = MatchStore::open_in_memory().unwrap();
        let mut c = EngineConfig::default();
        c.generation.model = "test-model".into();
        c.cache.max_entries = 42;
        c.save(&store).unwrap();

        let loaded = EngineConfig::load(&store);
        assert_eq!(loaded.generation.model, "test-model");
        assert_eq!(loaded.cache.max_entries, 42);
    }

    #[test]
    fn load_falls_back_to_defaults_on_garbage() {
        let store = MatchStore::open_in_memory().unwrap();
        store.set_config(CONFIG_KEY, "not json").unwrap();
        let loaded = EngineConfig::load(&store);
        assert_eq!(loaded.matching.max_results, 3);
    }
}

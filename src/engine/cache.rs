// PawMatch Engine — Semantic Response Cache
//
// Memoizes generation output for router and Q&A-style calls. Two tiers:
//   1. Exact — normalize the input, hash it with the flow tag, hit the
//      primary key.  Similarity is 1.0 by definition.
//   2. Approximate — embed the input and cosine-scan the flow's stored
//      vectors; the closest entry wins if it clears the threshold.
//
// The cache is always best-effort: lookups degrade to misses and writes are
// fire-and-forget.  A generation call never waits on, or fails because of,
// the cache.

use crate::engine::config::CacheConfig;
use crate::engine::embedding::Embedder;
use crate::engine::store::{vector, MatchStore};
use crate::engine::types::CacheHit;
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub struct SemanticCache {
    store: Arc<MatchStore>,
    embedder: Arc<dyn Embedder>,
    max_entries: usize,
    similarity_threshold: f64,
}

impl SemanticCache {
    pub fn new(store: Arc<MatchStore>, embedder: Arc<dyn Embedder>, config: &CacheConfig) -> Self {
        SemanticCache {
            store,
            embedder,
            max_entries: config.max_entries,
            similarity_threshold: config.similarity_threshold,
        }
    }

    /// Lowercase, trim, collapse internal whitespace.  "  Hello   WORLD "
    /// and "hello world" key identically.
    fn normalize(input: &str) -> String {
        input
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Exact-tier key: SHA-256 over the flow tag and the normalized input.
    fn hash_key(flow: &str, normalized: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(flow.as_bytes());
        hasher.update(b"\n");
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a cached response for `input` scoped to `flow`.
    pub async fn lookup(&self, input: &str, flow: &str) -> Option<CacheHit> {
        let normalized = Self::normalize(input);
        let hash = Self::hash_key(flow, &normalized);

        // ── Tier 1: exact match ────────────────────────────────────────
        match self.store.cache_get_exact(&hash, flow) {
            Ok(Some(entry)) => {
                if let Err(e) = self.store.cache_touch(&hash, flow) {
                    warn!("[cache] Failed to record hit: {}", e);
                }
                info!("[cache] Exact hit for flow '{}'", flow);
                return Some(CacheHit {
                    response: entry.response,
                    similarity: 1.0,
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!("[cache] Exact lookup failed: {} — treating as miss", e);
                return None;
            }
        }

        // ── Tier 2: approximate nearest neighbor ───────────────────────
        let query_vec = match self.embedder.embed(input).await {
            Ok(v) => v,
            Err(e) => {
                warn!("[cache] Embedding failed: {} — skipping semantic tier", e);
                return None;
            }
        };

        let rows = match self.store.cache_scan_flow(flow) {
            Ok(r) => r,
            Err(e) => {
                warn!("[cache] Flow scan failed: {} — treating as miss", e);
                return None;
            }
        };

        let mut best: Option<(String, String, f64)> = None;
        for (entry_hash, blob, response) in rows {
            let stored = vector::bytes_to_f32_vec(&blob);
            let score = vector::cosine_similarity(&query_vec, &stored);
            if best.as_ref().map(|(_, _, s)| score > *s).unwrap_or(true) {
                best = Some((entry_hash, response, score));
            }
        }

        match best {
            Some((entry_hash, response, similarity))
                if similarity >= self.similarity_threshold =>
            {
                if let Err(e) = self.store.cache_touch(&entry_hash, flow) {
                    warn!("[cache] Failed to record hit: {}", e);
                }
                info!(
                    "[cache] Semantic hit for flow '{}' (similarity {:.3})",
                    flow, similarity
                );
                Some(CacheHit {
                    response,
                    similarity,
                })
            }
            _ => None,
        }
    }

    /// Store a response.  Fire-and-forget: every failure is logged and
    /// swallowed so the primary response is never blocked.
    pub async fn store(&self, input: &str, response: &str, flow: &str) {
        let normalized = Self::normalize(input);
        let hash = Self::hash_key(flow, &normalized);

        // Bounded size: evict one batch before inserting at capacity.
        match self.store.cache_count() {
            Ok(count) if count as usize >= self.max_entries => {
                let batch = (self.max_entries / crate::atoms::constants::CACHE_EVICT_DIVISOR).max(1);
                if let Err(e) = self.store.cache_evict(batch) {
                    warn!("[cache] Eviction failed: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("[cache] Count failed: {}", e),
        }

        let embedding = match self.embedder.embed(input).await {
            Ok(v) => Some(vector::f32_vec_to_bytes(&v)),
            Err(e) => {
                warn!("[cache] Embedding failed on store: {} — caching exact-only", e);
                None
            }
        };

        if let Err(e) =
            self.store
                .cache_upsert(&hash, flow, input, embedding.as_deref(), response)
        {
            warn!("[cache] Store failed: {} — response not cached", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::EngineResult;
    use async_trait::async_trait;

    /// Deterministic fake: hashes words into a small dense vector so that
    /// identical texts embed identically and disjoint texts diverge.
    struct WordHashEmbedder;

    #[async_trait]
    impl Embedder for WordHashEmbedder {
        async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
            let mut v = vec![0.0f32; 8];
            for word in text.to_lowercase().split_whitespace() {
                let mut h: usize = 17;
                for b in word.bytes() {
                    h = h.wrapping_mul(31).wrapping_add(b as usize);
                }
                v[h % 8] += 1.0;
            }
            Ok(v)
        }
    }

    /// Always fails — exercises the graceful-degradation paths.
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> EngineResult<Vec<f32>> {
            Err("embedding offline".into())
        }
    }

    fn cache_with(embedder: Arc<dyn Embedder>, max_entries: usize) -> SemanticCache {
        let store = Arc::new(MatchStore::open_in_memory().unwrap());
        SemanticCache::new(
            store,
            embedder,
            &CacheConfig {
                max_entries,
                similarity_threshold: 0.85,
            },
        )
    }

    #[tokio::test]
    async fn exact_hit_on_casing_and_whitespace_variants() {
        let cache = cache_with(Arc::new(WordHashEmbedder), 100);
        cache.store("What breeds are good with kids?", "labs!", "qa").await;

        let hit = cache
            .lookup("  what   BREEDS are good with kids? ", "qa")
            .await
            .expect("variant should hit the exact tier");
        assert_eq!(hit.response, "labs!");
        assert_eq!(hit.similarity, 1.0);
    }

    #[tokio::test]
    async fn flow_tags_isolate_entries() {
        let cache = cache_with(Arc::new(WordHashEmbedder), 100);
        cache.store("hello", "routed", "router").await;

        assert!(cache.lookup("hello", "qa").await.is_none());
        assert!(cache.lookup("hello", "router").await.is_some());
    }

    #[tokio::test]
    async fn semantic_tier_hits_identical_embedding() {
        let cache = cache_with(Arc::new(WordHashEmbedder), 100);
        cache.store("good dogs for kids", "try a lab", "qa").await;

        // Different word order normalizes differently (exact miss) but the
        // bag-of-words fake embeds identically → similarity 1.0 ≥ threshold.
        let hit = cache
            .lookup("kids for good dogs", "qa")
            .await
            .expect("semantic tier should hit");
        assert!(hit.similarity >= 0.85);
        assert_eq!(hit.response, "try a lab");
    }

    #[tokio::test]
    async fn dissimilar_input_misses() {
        let cache = cache_with(Arc::new(WordHashEmbedder), 100);
        cache.store("good dogs for kids", "try a lab", "qa").await;

        assert!(cache
            .lookup("completely unrelated quantum physics question", "qa")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn broken_embedder_degrades_to_exact_only() {
        let cache = cache_with(Arc::new(BrokenEmbedder), 100);
        cache.store("hello there", "hi", "qa").await;

        // Exact tier still works…
        assert!(cache.lookup("Hello  THERE", "qa").await.is_some());
        // …and the semantic tier silently misses instead of erroring.
        assert!(cache.lookup("greetings friend", "qa").await.is_none());
    }

    #[tokio::test]
    async fn eviction_bounds_store_size() {
        let cache = cache_with(Arc::new(WordHashEmbedder), 10);
        for i in 0..25 {
            cache
                .store(&format!("input number {}", i), "resp", "qa")
                .await;
        }
        let count = cache.store.cache_count().unwrap();
        assert!(
            count as usize <= 10 + 1,
            "store grew past max + in-flight insert: {}",
            count
        );
    }

    #[tokio::test]
    async fn repeated_store_overwrites_not_duplicates() {
        let cache = cache_with(Arc::new(WordHashEmbedder), 100);
        cache.store("same input", "first", "qa").await;
        cache.store("same input", "second", "qa").await;

        assert_eq!(cache.store.cache_count().unwrap(), 1);
        let hit = cache.lookup("same input", "qa").await.unwrap();
        assert_eq!(hit.response, "second");
    }
}

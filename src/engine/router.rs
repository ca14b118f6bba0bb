// PawMatch Engine — Intent Router
// Decides which flow should handle an utterance while no results exist:
// preference collection (the adoption funnel) or free-form Q&A.
//
// Primary path: a structured decision from the generation capability,
// memoized in the semantic cache under the "router" flow tag.  Fallback
// path: keyword heuristics — fast, deterministic, no model required.

use crate::engine::cache::SemanticCache;
use crate::engine::generation::{extract_json_block, TextGenerator};
use crate::engine::types::{ActiveFlow, GenerationPrompt};
use log::{info, warn};

/// Cache flow tag for router decisions.
pub const ROUTER_FLOW: &str = "router";

const ROUTER_SYSTEM_PROMPT: &str = "You route messages for a pet-adoption assistant. \
Decide whether the user is describing themselves / what pet they want \
(adoption preferences) or asking a general question about pets or adoption. \
Respond with exactly one JSON object: {\"flow\": \"collecting_preferences\"} \
or {\"flow\": \"qa\"}. No other text.";

/// Classify an utterance into a flow.  Never fails: every error path lands
/// in the keyword heuristic.
pub async fn route_intent(
    generator: &dyn TextGenerator,
    cache: &SemanticCache,
    utterance: &str,
) -> ActiveFlow {
    // ── Cached decision ────────────────────────────────────────────────
    if let Some(hit) = cache.lookup(utterance, ROUTER_FLOW).await {
        if let Some(flow) = parse_decision(&hit.response) {
            info!(
                "[router] Cached decision '{}' (similarity {:.3})",
                flow.as_str(),
                hit.similarity
            );
            return flow;
        }
    }

    // ── Structured decision from the model ─────────────────────────────
    let prompt = GenerationPrompt::new(ROUTER_SYSTEM_PROMPT, utterance);
    match generator.complete(&prompt).await {
        Ok(raw) => {
            if let Some(flow) = parse_decision(&raw) {
                cache.store(utterance, &raw, ROUTER_FLOW).await;
                return flow;
            }
            warn!("[router] Unparsable router decision — using heuristics");
        }
        Err(e) => {
            warn!("[router] Generation failed: {} — using heuristics", e);
        }
    }

    classify_heuristic(utterance)
}

/// Pull the flow out of a (possibly prose-wrapped) decision payload.
fn parse_decision(raw: &str) -> Option<ActiveFlow> {
    let v = extract_json_block(raw)?;
    v["flow"].as_str().and_then(ActiveFlow::parse)
}

/// Keyword heuristics — no model required, fast and deterministic.
/// Scores preference-statement signals against question signals; the
/// adoption funnel wins ties because it is the product's primary flow.
pub fn classify_heuristic(utterance: &str) -> ActiveFlow {
    let u = utterance.to_lowercase();

    let mut preference = 0.0_f32;
    let mut question = 0.0_f32;

    // ── Preference-statement signals ─────────────────────────────────
    // Self-description and pet-seeking phrasing.
    if contains_any(&u, &[
        "looking for", "i want", "i'd like", "i would like", "adopt",
        "searching for", "find me", "match me", "help me find",
    ]) {
        preference += 0.6;
    }
    if contains_any(&u, &[
        "i live", "my house", "my apartment", "i have kids", "i have children",
        "no kids", "no children", "other pets", "my cat", "my dog",
        "first time", "never owned", "active", "yard",
    ]) {
        preference += 0.5;
    }
    if contains_any(&u, &["puppy", "kitten", "breed", "rescue", "shelter"]) {
        preference += 0.2;
    }

    // ── Question signals ─────────────────────────────────────────────
    if starts_with_any(&u, &[
        "what ", "what's ", "how ", "why ", "when ", "where ", "who ",
        "is it ", "are ", "can ", "do ", "does ", "should ",
    ]) {
        question += 0.5;
    }
    if u.trim_end().ends_with('?') {
        question += 0.3;
    }
    if contains_any(&u, &["how much", "how often", "how long", "what does", "tell me about"]) {
        question += 0.3;
    }

    if question > preference {
        ActiveFlow::Qa
    } else {
        ActiveFlow::CollectingPreferences
    }
}

fn starts_with_any(s: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| s.starts_with(p))
}

fn contains_any(s: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| s.contains(t))
}

// PawMatch Engine — Session State Machine
//
// The top-level orchestrator.  Owns per-session state and routes each
// inbound utterance: routing → {collecting_preferences, qa}, with the
// has_results super-state handing every later turn to the post-result
// handler (regenerate vs. answer, decided by a structured decision and
// dispatched with an exhaustive match).
//
// Failure policy: any error from a sub-step is caught here and converted
// into a generic apologetic follow-up; the stored session is left unchanged
// on such failure.  The session row is only written after a full cycle
// succeeds.  The one hard error out of this layer is SessionNotFound.

use crate::atoms::error::EngineResult;
use crate::engine::cache::SemanticCache;
use crate::engine::config::EngineConfig;
use crate::engine::embedding::{Embedder, EmbeddingClient};
use crate::engine::generation::{extract_json_block, GenerationClient, TextGenerator};
use crate::engine::preferences;
use crate::engine::scoring;
use crate::engine::selection;
use crate::engine::store::MatchStore;
use crate::engine::types::{
    ActiveFlow, BreedCheck, ChatRole, GenerationPrompt, PostResultAction, PreferenceRecord,
    SessionData, SessionStateView, StartSessionResponse, TurnResponse,
};
use crate::engine::router;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache flow tag for free-form Q&A answers.
pub const QA_FLOW: &str = "qa";

const APOLOGY: &str = "I'm sorry — something went wrong on my end processing that. \
Could you try saying it again, or tell me a bit more about what you're looking for?";

const QA_SYSTEM_PROMPT: &str = "You are a friendly pet-adoption assistant. Answer \
the user's question helpfully and concisely. If the question is about adopting, \
gently remind them you can also match them with available pets.";

const POST_RESULT_SYSTEM_PROMPT: &str = "The user already received pet \
recommendations and sent a follow-up. Decide what they want. Respond with \
exactly one JSON object, either:\n\
{\"action\": \"regenerate\", \"exclude_ids\": [\"<ids to drop>\"], \
\"breeds\": [\"<breed>\"] or null, \"breed_strict\": true/false/null}\n\
— when they want different or adjusted results, or:\n\
{\"action\": \"answer\", \"reply\": \"<your answer>\"}\n\
— when they are asking a question. No other text.";

pub struct MatchEngine {
    store: Arc<MatchStore>,
    generator: Arc<dyn TextGenerator>,
    cache: SemanticCache,
    config: EngineConfig,
    /// At-most-one-in-flight processing per session id.  The backing store
    /// does not serialize concurrent turns; this registry does.
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MatchEngine {
    /// Wire the engine with explicit capability implementations.  Tests
    /// inject scripted fakes through this.
    pub fn new(
        store: Arc<MatchStore>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Self {
        let cache = SemanticCache::new(store.clone(), embedder, &config.cache);
        MatchEngine {
            store,
            generator,
            cache,
            config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the engine with the real HTTP clients from config.
    pub fn from_config(store: Arc<MatchStore>, config: EngineConfig) -> Self {
        let generator: Arc<dyn TextGenerator> =
            Arc::new(GenerationClient::new(&config.generation));
        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&config.embedding));
        Self::new(store, generator, embedder, config)
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.session_locks.lock();
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // ── startSession ───────────────────────────────────────────────────

    pub fn start_session(&self, user_id: Option<&str>) -> EngineResult<StartSessionResponse> {
        // Opportunistic housekeeping — never blocks session creation.
        if let Err(e) = self
            .store
            .prune_expired_sessions(self.config.matching.session_ttl_secs)
        {
            warn!("[engine] Session pruning failed: {}", e);
        }

        let prior = user_id
            .and_then(|uid| self.store.get_preferences(uid).ok())
            .flatten();
        let is_returning_user = prior.as_ref().map(|p| p.is_complete()).unwrap_or(false);

        // Returning users resume their full record; everyone else starts
        // empty, with the location carried over when we have one.
        let preferences = match &prior {
            Some(p) if p.is_complete() => p.clone(),
            Some(p) => PreferenceRecord {
                location: p.location.clone(),
                ..Default::default()
            },
            None => PreferenceRecord::default(),
        };

        let now = chrono::Utc::now().to_rfc3339();
        let session = SessionData {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.map(|s| s.to_string()),
            active_flow: ActiveFlow::Routing,
            preferences,
            history: Vec::new(),
            recommendations: None,
            completed: false,
            pending_breed_check: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.create_session(&session)?;
        info!(
            "[engine] Started session {} (returning: {})",
            session.id, is_returning_user
        );

        let welcome_message = if is_returning_user {
            format!(
                "Welcome back! Last time you told me you: {}. Is that all still \
                 right, or has anything changed?",
                prior.as_ref().map(|p| p.summary()).unwrap_or_default()
            )
        } else {
            "Hi! I help match people with adoptable pets. Tell me a bit about \
             yourself and your home, or ask me anything about adoption."
                .into()
        };

        Ok(StartSessionResponse {
            session_id: session.id,
            welcome_message,
            is_returning_user,
            prior_preferences: if is_returning_user { prior } else { None },
        })
    }

    // ── handleMessage ──────────────────────────────────────────────────

    pub async fn handle_message(
        &self,
        session_id: &str,
        utterance: &str,
    ) -> EngineResult<TurnResponse> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        // A missing session is the caller's problem — propagate.
        let mut session = self.store.get_session(session_id)?;
        let flow_before = session.active_flow;

        match self.process_turn(&mut session, utterance).await {
            Ok(response) => {
                self.persist_turn(&session, utterance, &response.message);
                Ok(response)
            }
            Err(e) => {
                // Recovered locally: generic follow-up, stored state untouched.
                warn!(
                    "[engine] Turn failed for session {}: {} — returning fallback",
                    session_id, e
                );
                Ok(TurnResponse {
                    message: APOLOGY.into(),
                    active_flow: flow_before,
                    recommendations: None,
                })
            }
        }
    }

    /// Write the completed cycle back: both utterances, then the mutated
    /// session row, then the history cap.  Persistence failures are logged
    /// and swallowed — the user already has their answer.
    fn persist_turn(&self, session: &SessionData, utterance: &str, reply: &str) {
        let id = &session.id;
        if let Err(e) = self.store.append_turn(id, ChatRole::User, utterance) {
            warn!("[engine] Failed to persist user turn: {}", e);
        }
        if let Err(e) = self.store.append_turn(id, ChatRole::Assistant, reply) {
            warn!("[engine] Failed to persist assistant turn: {}", e);
        }
        if let Err(e) = self.store.update_session(session) {
            warn!("[engine] Failed to persist session {}: {}", id, e);
        }
        if let Err(e) = self
            .store
            .trim_session_history(id, self.config.matching.max_stored_turns)
        {
            warn!("[engine] Failed to trim history for {}: {}", id, e);
        }
    }

    async fn process_turn(
        &self,
        session: &mut SessionData,
        utterance: &str,
    ) -> EngineResult<TurnResponse> {
        // Terminal super-state: results exist, the post-result handler owns
        // every further turn.
        if session.has_results() {
            return self.post_result_turn(session, utterance).await;
        }

        if session.active_flow == ActiveFlow::Routing {
            let flow = router::route_intent(self.generator.as_ref(), &self.cache, utterance).await;
            info!("[engine] Routed session {} to {}", session.id, flow.as_str());
            session.active_flow = flow;
        }

        match session.active_flow {
            ActiveFlow::CollectingPreferences => self.collect_turn(session, utterance).await,
            ActiveFlow::Qa => self.qa_turn(session, utterance).await,
            // Routing is transient — the router always lands on a flow above.
            ActiveFlow::Routing => self.collect_turn(session, utterance).await,
        }
    }

    // ── Preference collection ──────────────────────────────────────────

    async fn collect_turn(
        &self,
        session: &mut SessionData,
        utterance: &str,
    ) -> EngineResult<TurnResponse> {
        let outcome = preferences::extract_and_merge(
            self.generator.as_ref(),
            &self.store,
            session,
            utterance,
            self.config.matching.history_prompt_turns,
        )
        .await?;

        session.preferences = outcome.record;

        // Breed negotiation: a newly introduced breed triggers a live
        // availability lookup, surfaced in this turn's follow-up.  An
        // answered strictness question clears the marker.
        if let Some(breeds) = outcome.introduced_breeds {
            let available = self
                .store
                .count_breed_available(&breeds, session.preferences.location.as_deref())?;
            info!(
                "[engine] Breed check for {:?}: {} available",
                breeds, available
            );
            session.pending_breed_check = Some(BreedCheck { breeds, available });
        } else if session.preferences.breed_strict.is_some() {
            session.pending_breed_check = None;
        }

        if outcome.missing.is_empty() {
            // All five required fields present — match now.  Strictness is
            // optional and never blocks this.
            return self.run_matching(session).await;
        }

        let message =
            preferences::follow_up_question(&outcome.missing, session.pending_breed_check.as_ref());
        Ok(TurnResponse {
            message,
            active_flow: session.active_flow,
            recommendations: None,
        })
    }

    // ── Matching ───────────────────────────────────────────────────────

    async fn run_matching(&self, session: &mut SessionData) -> EngineResult<TurnResponse> {
        let scored = scoring::score_candidates(
            &self.store,
            &session.preferences,
            self.config.matching.max_results,
        )?;
        let result =
            selection::select(self.generator.as_ref(), &scored, &session.preferences).await;

        session.pending_breed_check = None;
        session.completed = true;
        let message = format_result_message(&result);
        session.recommendations = Some(result.clone());

        Ok(TurnResponse {
            message,
            active_flow: session.active_flow,
            recommendations: Some(result),
        })
    }

    // ── Q&A ────────────────────────────────────────────────────────────

    async fn qa_turn(
        &self,
        session: &mut SessionData,
        utterance: &str,
    ) -> EngineResult<TurnResponse> {
        if let Some(hit) = self.cache.lookup(utterance, QA_FLOW).await {
            info!(
                "[engine] QA cache hit (similarity {:.3}) for session {}",
                hit.similarity, session.id
            );
            return Ok(TurnResponse {
                message: hit.response,
                active_flow: session.active_flow,
                recommendations: None,
            });
        }

        let prompt = GenerationPrompt::new(QA_SYSTEM_PROMPT, utterance)
            .with_history(&session.history, self.config.matching.history_prompt_turns);
        let answer = self.generator.complete(&prompt).await?;

        self.cache.store(utterance, &answer, QA_FLOW).await;

        Ok(TurnResponse {
            message: answer,
            active_flow: session.active_flow,
            recommendations: None,
        })
    }

    // ── Post-result handling ───────────────────────────────────────────

    async fn post_result_turn(
        &self,
        session: &mut SessionData,
        utterance: &str,
    ) -> EngineResult<TurnResponse> {
        let context = session
            .recommendations
            .as_ref()
            .map(|r| {
                r.pets
                    .iter()
                    .map(|p| format!("{} (id {})", p.name, p.id))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        let system = format!(
            "{}\nCurrent recommendations: {}",
            POST_RESULT_SYSTEM_PROMPT, context
        );
        let prompt = GenerationPrompt::new(system, utterance)
            .with_history(&session.history, self.config.matching.history_prompt_turns);

        let action = match self.generator.complete(&prompt).await {
            Ok(raw) => extract_json_block(&raw)
                .and_then(|v| serde_json::from_value::<PostResultAction>(v).ok()),
            Err(e) => {
                warn!("[engine] Post-result decision failed: {}", e);
                None
            }
        };

        // Closed tagged union, exhaustive dispatch.  An undecidable turn
        // degrades to the Q&A path.
        match action {
            Some(PostResultAction::Regenerate {
                exclude_ids,
                breeds,
                breed_strict,
            }) => {
                self.regenerate(session, exclude_ids, breeds, breed_strict)
                    .await
            }
            Some(PostResultAction::Answer { reply }) if !reply.trim().is_empty() => {
                Ok(TurnResponse {
                    message: reply,
                    active_flow: session.active_flow,
                    recommendations: None,
                })
            }
            _ => self.qa_turn(session, utterance).await,
        }
    }

    /// Re-run scoring + selection with explicit include/exclude and
    /// strictness adjustments from the structured decision.
    async fn regenerate(
        &self,
        session: &mut SessionData,
        exclude_ids: Vec<String>,
        breeds: Option<Vec<String>>,
        breed_strict: Option<bool>,
    ) -> EngineResult<TurnResponse> {
        info!(
            "[engine] Regenerating for session {} (exclude {:?}, breeds {:?}, strict {:?})",
            session.id, exclude_ids, breeds, breed_strict
        );

        if let Some(breeds) = breeds {
            if !breeds.is_empty() {
                session.preferences.preferred_breeds = Some(breeds);
            }
        }
        if breed_strict.is_some() {
            session.preferences.breed_strict = breed_strict;
        }

        // Over-fetch past the exclusions so dropping them leaves a full set.
        let limit = self.config.matching.max_results + exclude_ids.len();
        let mut scored =
            scoring::score_candidates(&self.store, &session.preferences, limit)?;
        scored.retain(|s| !exclude_ids.contains(&s.animal.id));
        scored.truncate(self.config.matching.max_results);

        let result =
            selection::select(self.generator.as_ref(), &scored, &session.preferences).await;

        let message = format_result_message(&result);
        session.recommendations = Some(result.clone());

        Ok(TurnResponse {
            message,
            active_flow: session.active_flow,
            recommendations: Some(result),
        })
    }

    // ── Introspection & lifecycle ──────────────────────────────────────

    /// Explicitly close a session ahead of its TTL.
    pub fn close_session(&self, session_id: &str) -> EngineResult<()> {
        self.session_locks.lock().remove(session_id);
        self.store.delete_session(session_id)
    }

    pub fn session_state(&self, session_id: &str) -> EngineResult<SessionStateView> {
        let session = self.store.get_session(session_id)?;
        Ok(SessionStateView {
            active_flow: session.active_flow,
            recommendations: session.recommendations,
            history: session.history,
        })
    }

    pub fn cache_stats(&self) -> EngineResult<crate::engine::types::CacheStats> {
        self.store.cache_stats()
    }
}

/// Render a recommendation result as one chat message.
fn format_result_message(result: &crate::engine::types::RecommendationResult) -> String {
    if result.pets.is_empty() {
        return result.explanation.clone();
    }
    let mut lines = vec![result.explanation.clone(), String::new()];
    for pet in &result.pets {
        lines.push(format!("• {} — {}/100 match", pet.name, pet.match_score));
        for reason in &pet.reasons {
            lines.push(format!("   - {}", reason));
        }
    }
    lines.join("\n")
}

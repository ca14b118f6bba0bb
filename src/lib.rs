// PawMatch Engine — Conversational pet-adoption matching
//
// A library crate invoked by a messaging layer. Given a stream of user
// utterances on a session, it routes intent, extracts and merges adoption
// preferences, scores catalog candidates, and produces a short ranked list
// of recommendations with personalized reasons — caching generation output
// semantically along the way.
//
// Layering (one-way):
//   atoms/   — error type, constants. No engine imports.
//   engine/  — the matching engine proper. Imports atoms only.

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use engine::config::EngineConfig;
pub use engine::orchestrator::MatchEngine;
pub use engine::store::MatchStore;
pub use engine::types::{
    AnimalRecord, PreferenceRecord, RecommendationResult, ScoredCandidate, SessionStateView,
    StartSessionResponse, TurnResponse,
};

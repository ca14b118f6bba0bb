// PawMatch Engine — Selection & Explanation
//
// Takes the scored shortlist and asks the generation capability to pick at
// most 3 and write personalized reasons.  Model output is never trusted:
// the first balanced JSON block is extracted from the raw response, every
// claimed id is resolved against the real candidates (exact id, then
// case-insensitive name), and total parse failure falls back to the top 3
// by score.  This step never surfaces a hard error to the user.

use crate::atoms::constants::MAX_RECOMMENDATIONS;
use crate::engine::generation::{extract_json_block, TextGenerator};
use crate::engine::types::{
    GenerationPrompt, PreferenceRecord, RecommendationResult, RecommendedPet, ScoredCandidate,
};
use log::{info, warn};
use serde_json::Value;

const SELECTION_SYSTEM_PROMPT: &str = "You help match adopters with rescue pets. \
From the candidate list, choose the best matches for this adopter (at most 3) \
and explain why each fits THEM specifically. Respond with exactly one JSON \
object:\n\
{\"selections\": [{\"id\": \"<candidate id>\", \"reasons\": [\"...\", \"...\"]}], \
\"explanation\": \"<one short overall paragraph>\"}\n\
Give 1-2 concrete reasons per pet. Use only candidates from the list.";

/// Presented score: the raw additive total (max 125) clamped to the 0–100
/// scale the result contract promises.
fn match_score(candidate: &ScoredCandidate) -> u8 {
    candidate.total.min(100) as u8
}

fn format_candidates(scored: &[ScoredCandidate]) -> String {
    scored
        .iter()
        .map(|s| {
            format!(
                "- id={} name={} breed={} age_months={} energy={} fee=${:.0} temperament=\"{}\" score={}",
                s.animal.id,
                s.animal.name,
                s.animal.breed,
                s.animal.age_months,
                s.animal.energy.label(),
                s.animal.fee,
                s.animal.temperament,
                s.total,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolve a model-claimed identifier to a real candidate: exact id first,
/// then case-insensitive name.  Models fabricate and malform ids; the
/// resolved entity's real catalog id always replaces the claim.
fn resolve<'a>(claimed: &str, scored: &'a [ScoredCandidate]) -> Option<&'a ScoredCandidate> {
    if let Some(found) = scored.iter().find(|s| s.animal.id == claimed) {
        return Some(found);
    }
    let lowered = claimed.to_lowercase();
    scored
        .iter()
        .find(|s| s.animal.name.to_lowercase() == lowered)
}

fn parse_reasons(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|r| r.as_str())
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .take(2)
                .collect()
        })
        .unwrap_or_default()
}

/// Deterministic fallback: top candidates by score with templated reasons.
fn fallback_result(scored: &[ScoredCandidate]) -> RecommendationResult {
    let pets = scored
        .iter()
        .take(MAX_RECOMMENDATIONS)
        .map(|s| RecommendedPet {
            id: s.animal.id.clone(),
            name: s.animal.name.clone(),
            match_score: match_score(s),
            reasons: vec![
                format!("Match score: {}", match_score(s)),
                format!("Energy level: {}", s.animal.energy.label()),
            ],
        })
        .collect();
    RecommendationResult {
        pets,
        explanation: "Here are the closest matches to what you told me — happy to \
                      adjust if any of these don't feel right."
            .into(),
    }
}

/// Pick the top candidates and write personalized reasons.
///
/// Never fails: generation and parse problems degrade to the deterministic
/// fallback, and an empty candidate list returns immediately with an
/// explanatory message (no generation call).
pub async fn select(
    generator: &dyn TextGenerator,
    scored: &[ScoredCandidate],
    prefs: &PreferenceRecord,
) -> RecommendationResult {
    if scored.is_empty() {
        return RecommendationResult {
            pets: Vec::new(),
            explanation: "I couldn't find any available pets matching all of your \
                          criteria right now. You could widen the search — for \
                          example by relaxing the breed or location — and I'll \
                          look again."
                .into(),
        };
    }

    let user = format!(
        "Adopter: {}\n\nCandidates:\n{}",
        prefs.summary(),
        format_candidates(scored)
    );
    let prompt = GenerationPrompt::new(SELECTION_SYSTEM_PROMPT, user);

    let raw = match generator.complete(&prompt).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("[selection] Generation failed: {} — using fallback", e);
            return fallback_result(scored);
        }
    };

    let Some(value) = extract_json_block(&raw) else {
        warn!("[selection] No JSON block in selection response — using fallback");
        return fallback_result(scored);
    };

    let Some(selections) = value["selections"].as_array() else {
        warn!("[selection] Missing 'selections' array — using fallback");
        return fallback_result(scored);
    };

    let mut pets: Vec<RecommendedPet> = Vec::new();
    for entry in selections.iter() {
        let claimed = entry["id"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| entry["name"].as_str());
        let Some(claimed) = claimed else {
            continue;
        };
        let Some(candidate) = resolve(claimed, scored) else {
            warn!("[selection] Discarding unresolvable selection '{}'", claimed);
            continue;
        };
        if pets.iter().any(|p| p.id == candidate.animal.id) {
            continue; // model repeated itself
        }

        let mut reasons = parse_reasons(&entry["reasons"]);
        if reasons.is_empty() {
            reasons.push(format!("Match score: {}", match_score(candidate)));
        }

        pets.push(RecommendedPet {
            id: candidate.animal.id.clone(),
            name: candidate.animal.name.clone(),
            match_score: match_score(candidate),
            reasons,
        });
        if pets.len() == MAX_RECOMMENDATIONS {
            break;
        }
    }

    if pets.is_empty() {
        warn!("[selection] No selection resolved to a real candidate — using fallback");
        return fallback_result(scored);
    }

    let explanation = value["explanation"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "These matches line up well with what you're looking for.".into());

    info!("[selection] Selected {} pet(s)", pets.len());
    RecommendationResult { pets, explanation }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::{EngineError, EngineResult};
    use crate::engine::types::{AnimalRecord, AnimalStatus, EnergyLevel, ScoreBreakdown};
    use async_trait::async_trait;

    struct ScriptedGenerator(String);

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn complete(&self, _prompt: &GenerationPrompt) -> EngineResult<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn complete(&self, _prompt: &GenerationPrompt) -> EngineResult<String> {
            Err(EngineError::generation("capability offline"))
        }
    }

    fn candidate(id: &str, name: &str, total: u32) -> ScoredCandidate {
        ScoredCandidate {
            animal: AnimalRecord {
                id: id.into(),
                name: name.into(),
                species: "dog".into(),
                breed: "Mixed".into(),
                age_months: 24,
                energy: EnergyLevel::Medium,
                child_safe: true,
                pet_safe: true,
                fee: 100.0,
                location: "Austin".into(),
                temperament: "friendly".into(),
                description: String::new(),
                status: AnimalStatus::Available,
            },
            total,
            breakdown: ScoreBreakdown::default(),
        }
    }

    fn shortlist() -> Vec<ScoredCandidate> {
        vec![
            candidate("a1", "Biscuit", 110),
            candidate("a2", "Maple", 90),
            candidate("a3", "Ziggy", 70),
            candidate("a4", "Pepper", 60),
        ]
    }

    #[tokio::test]
    async fn empty_input_skips_generation() {
        // FailingGenerator would error if called — it must not be.
        let result = select(&FailingGenerator, &[], &PreferenceRecord::default()).await;
        assert!(result.pets.is_empty());
        assert!(result.explanation.to_lowercase().contains("widen"));
    }

    #[tokio::test]
    async fn fabricated_id_resolves_by_name() {
        let raw = r#"{"selections": [{"id": "pet-9999", "reasons": ["x"]},
                        {"id": "Maple", "reasons": ["gentle and calm"]}],
                      "explanation": "Both fit."}"#;
        let result = select(
            &ScriptedGenerator(raw.into()),
            &shortlist(),
            &PreferenceRecord::default(),
        )
        .await;

        // "pet-9999" resolves nowhere and is discarded; "Maple" resolves by
        // case-insensitive name and carries the REAL catalog id.
        assert_eq!(result.pets.len(), 1);
        assert_eq!(result.pets[0].id, "a2");
        assert_eq!(result.pets[0].name, "Maple");
    }

    #[tokio::test]
    async fn garbage_response_falls_back_to_top_three() {
        let result = select(
            &ScriptedGenerator("I love all dogs equally!".into()),
            &shortlist(),
            &PreferenceRecord::default(),
        )
        .await;

        assert_eq!(result.pets.len(), 3);
        assert_eq!(result.pets[0].id, "a1");
        assert_eq!(result.pets[0].match_score, 100); // 110 clamped
        assert!(result.pets[0].reasons[0].starts_with("Match score:"));
        assert!(result.pets[0].reasons[1].starts_with("Energy level:"));
    }

    #[tokio::test]
    async fn generation_failure_falls_back() {
        let result = select(
            &FailingGenerator,
            &shortlist(),
            &PreferenceRecord::default(),
        )
        .await;
        assert_eq!(result.pets.len(), 3);
    }

    #[tokio::test]
    async fn caps_at_three_and_dedupes() {
        let raw = r#"{"selections": [
            {"id": "a1", "reasons": ["r"]},
            {"id": "a1", "reasons": ["repeat"]},
            {"id": "a2", "reasons": ["r"]},
            {"id": "a3", "reasons": ["r"]},
            {"id": "a4", "reasons": ["r"]}
        ], "explanation": "all of them"}"#;
        let result = select(
            &ScriptedGenerator(raw.into()),
            &shortlist(),
            &PreferenceRecord::default(),
        )
        .await;

        assert_eq!(result.pets.len(), 3);
        let ids: Vec<&str> = result.pets.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);
    }

    #[tokio::test]
    async fn json_wrapped_in_prose_still_parses() {
        let raw = "Here you go!\n```json\n{\"selections\": [{\"id\": \"a3\", \
                   \"reasons\": [\"chill\", \"small\"]}], \"explanation\": \"Ziggy it is.\"}\n```";
        let result = select(
            &ScriptedGenerator(raw.into()),
            &shortlist(),
            &PreferenceRecord::default(),
        )
        .await;

        assert_eq!(result.pets.len(), 1);
        assert_eq!(result.pets[0].id, "a3");
        assert_eq!(result.pets[0].reasons.len(), 2);
        assert_eq!(result.explanation, "Ziggy it is.");
    }

    #[tokio::test]
    async fn scores_clamp_to_one_hundred() {
        let raw = r#"{"selections": [{"id": "a1", "reasons": ["r"]}], "explanation": "e"}"#;
        let result = select(
            &ScriptedGenerator(raw.into()),
            &shortlist(),
            &PreferenceRecord::default(),
        )
        .await;
        assert_eq!(result.pets[0].match_score, 100);
    }
}

// PawMatch Engine — Preference Engine
//
// Extracts a structured preference delta from each utterance, sanitizes it,
// and merges it into the session's record.  The merge is right-biased and
// field-independent: a delta value wins when present (explicit `false`
// included), otherwise the current value is kept.  The model is only ever
// asked for fields the user explicitly stated — owner experience in
// particular is collected through a direct question, never inferred.

use crate::atoms::constants::RESERVED_PLACEHOLDERS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::generation::{extract_json_block, TextGenerator};
use crate::engine::store::MatchStore;
use crate::engine::types::{
    BreedCheck, BudgetTier, EnergyLevel, ExperienceLevel, GenerationPrompt, HousingType,
    PreferenceRecord, SessionData,
};
use log::{info, warn};
use serde_json::Value;

// ── Delta ──────────────────────────────────────────────────────────────

/// The subset of fields the user explicitly stated this turn.  `None` means
/// "not mentioned", never "cleared" — records only grow or change, they are
/// not blanked by omission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceDelta {
    pub housing: Option<HousingType>,
    pub activity: Option<EnergyLevel>,
    pub has_children: Option<bool>,
    pub child_age: Option<u8>,
    pub has_other_pets: Option<bool>,
    pub other_pet_types: Option<Vec<String>>,
    pub experience: Option<ExperienceLevel>,
    pub budget: Option<BudgetTier>,
    pub preferred_breeds: Option<Vec<String>>,
    pub breed_strict: Option<bool>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// True for values the model emits instead of omitting a field.
fn is_placeholder(s: &str) -> bool {
    let t = s.trim().to_lowercase();
    RESERVED_PLACEHOLDERS.iter().any(|p| *p == t)
}

/// A string field, dropped when it is a reserved placeholder.
fn clean_str(v: &Value) -> Option<String> {
    let s = v.as_str()?;
    if is_placeholder(s) {
        None
    } else {
        Some(s.trim().to_string())
    }
}

/// A string-list field: accepts an array or a single string, drops
/// placeholder items, and collapses to None when nothing survives.
fn clean_str_list(v: &Value) -> Option<Vec<String>> {
    let items: Vec<String> = match v {
        Value::Array(arr) => arr
            .iter()
            .filter_map(clean_str)
            .collect(),
        Value::String(_) => clean_str(v).into_iter().collect(),
        _ => return None,
    };
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Booleans: accept native bools and the string forms models fall back to.
fn clean_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl PreferenceDelta {
    /// Tolerant field-by-field parse of the model's structured output.
    /// A field that fails to parse is simply absent from the delta —
    /// one malformed value never discards the rest of the turn.
    pub fn from_value(v: &Value) -> Self {
        PreferenceDelta {
            housing: clean_str(&v["housing"]).and_then(|s| HousingType::parse(&s)),
            activity: clean_str(&v["activity"]).and_then(|s| EnergyLevel::parse(&s)),
            has_children: clean_bool(&v["has_children"]),
            child_age: v["child_age"].as_u64().and_then(|n| u8::try_from(n).ok()),
            has_other_pets: clean_bool(&v["has_other_pets"]),
            other_pet_types: clean_str_list(&v["other_pet_types"]),
            experience: clean_str(&v["experience"]).and_then(|s| ExperienceLevel::parse(&s)),
            budget: clean_str(&v["budget"]).and_then(|s| BudgetTier::parse(&s)),
            preferred_breeds: clean_str_list(&v["preferred_breeds"]),
            breed_strict: clean_bool(&v["breed_strict"]),
            location: clean_str(&v["location"]),
            notes: clean_str(&v["notes"]),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PreferenceDelta::default()
    }
}

// ── Merge ──────────────────────────────────────────────────────────────

/// Right-biased, field-independent merge: for each field the delta's value
/// wins if present, otherwise the current value is kept.  Never a full
/// replace.
pub fn merge(current: &PreferenceRecord, delta: &PreferenceDelta) -> PreferenceRecord {
    PreferenceRecord {
        housing: delta.housing.or(current.housing),
        activity: delta.activity.or(current.activity),
        has_children: delta.has_children.or(current.has_children),
        child_age: delta.child_age.or(current.child_age),
        has_other_pets: delta.has_other_pets.or(current.has_other_pets),
        other_pet_types: delta
            .other_pet_types
            .clone()
            .or_else(|| current.other_pet_types.clone()),
        experience: delta.experience.or(current.experience),
        budget: delta.budget.or(current.budget),
        preferred_breeds: delta
            .preferred_breeds
            .clone()
            .or_else(|| current.preferred_breeds.clone()),
        breed_strict: delta.breed_strict.or(current.breed_strict),
        location: delta.location.clone().or_else(|| current.location.clone()),
        notes: delta.notes.clone().or_else(|| current.notes.clone()),
    }
}

// ── Extraction ─────────────────────────────────────────────────────────

fn extraction_prompt(current: &PreferenceRecord, pending: Option<&BreedCheck>) -> String {
    let mut prompt = String::from(
        "You extract pet-adoption preferences from one user message. \
Return exactly one JSON object containing ONLY the fields the user explicitly \
stated in this message. Omit everything else — never guess, never fill in \
placeholders like \"unknown\" or \"n/a\".\n\
Fields:\n\
  housing: \"apartment\" | \"house\" | \"house_with_yard\"\n\
  activity: \"low\" | \"medium\" | \"high\"  (the user's own activity level)\n\
  has_children: boolean\n\
  child_age: integer (youngest child, years)\n\
  has_other_pets: boolean\n\
  other_pet_types: [string]\n\
  experience: \"first_time\" | \"some\" | \"experienced\" — ONLY when the user \
directly states their ownership experience; never infer it from anything else\n\
  budget: \"low\" | \"medium\" | \"high\"\n\
  preferred_breeds: [string]\n\
  breed_strict: boolean — true means show ONLY those breeds\n\
  location: string\n\
  notes: string (anything else relevant)\n",
    );

    prompt.push_str(&format!(
        "\nKnown so far: {}\n",
        serde_json::to_string(current).unwrap_or_else(|_| "{}".into())
    ));

    if let Some(check) = pending {
        prompt.push_str(&format!(
            "\nThe user was just told {} {} of breed(s) {} are available and asked \
whether to show only that breed or include similar ones. If this message \
answers that, set breed_strict (true = only that breed, false = include \
others).\n",
            check.available,
            if check.available == 1 { "match" } else { "matches" },
            check.breeds.join(", "),
        ));
    }

    prompt
}

/// Result of one extract-and-merge cycle.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub record: PreferenceRecord,
    pub missing: Vec<&'static str>,
    /// Breeds newly introduced this turn while strictness is still unasked —
    /// the trigger for the breed-negotiation question.
    pub introduced_breeds: Option<Vec<String>>,
}

/// Run one extraction/merge cycle against the generation capability.
///
/// Errors (generation failure, unparsable output) propagate; the
/// orchestrator converts them into a conversational follow-up with the
/// session left untouched.  Preference-store persistence is best-effort.
pub async fn extract_and_merge(
    generator: &dyn TextGenerator,
    store: &MatchStore,
    session: &SessionData,
    utterance: &str,
    history_limit: usize,
) -> EngineResult<MergeOutcome> {
    let system = extraction_prompt(&session.preferences, session.pending_breed_check.as_ref());
    let prompt =
        GenerationPrompt::new(system, utterance).with_history(&session.history, history_limit);

    let raw = generator.complete(&prompt).await?;
    let value = extract_json_block(&raw).ok_or_else(|| {
        EngineError::MalformedOutput("no JSON object in extraction response".into())
    })?;

    let delta = PreferenceDelta::from_value(&value);
    info!(
        "[prefs] Extracted delta for session {}: {:?}",
        session.id, delta
    );

    let record = merge(&session.preferences, &delta);

    // Persist best-effort — a failed save never blocks the conversation.
    if let Some(user_id) = &session.user_id {
        if let Err(e) = store.put_preferences(user_id, &record) {
            warn!("[prefs] Failed to persist preferences for {}: {}", user_id, e);
        }
    }

    let introduced_breeds = match (&delta.preferred_breeds, record.breed_strict) {
        (Some(breeds), None) if !breeds.is_empty() => Some(breeds.clone()),
        _ => None,
    };

    let missing = record.missing_fields();
    Ok(MergeOutcome {
        record,
        missing,
        introduced_breeds,
    })
}

// ── Follow-up questions ────────────────────────────────────────────────

/// The next question to ask, given what is still missing.  The breed
/// strictness question takes precedence so the availability count is
/// surfaced in the turn that produced it.
pub fn follow_up_question(missing: &[&str], breed_check: Option<&BreedCheck>) -> String {
    if let Some(check) = breed_check {
        let breeds = check.breeds.join(", ");
        return match check.available {
            0 => format!(
                "I don't currently have any {} available, I'm afraid. Should I \
                 look only for that breed in case one comes in, or include \
                 similar breeds too?",
                breeds
            ),
            1 => format!(
                "Good news — I have 1 {} available right now. Would you like to \
                 see only that breed, or should I include similar ones as well?",
                breeds
            ),
            n => format!(
                "Good news — I have {} {}s available right now. Would you like \
                 to see only that breed, or should I include similar ones as well?",
                n, breeds
            ),
        };
    }

    match missing.first() {
        Some(&"housing") => {
            "What kind of home do you live in — an apartment, a house, or a house \
             with a yard?"
                .into()
        }
        Some(&"activity") => {
            "How active is your household? Would you say low, medium, or high \
             activity?"
                .into()
        }
        Some(&"has_children") => "Do you have children at home?".into(),
        Some(&"has_other_pets") => "Do you have any other pets?".into(),
        // Always an explicit direct question — never inferred.
        Some(&"experience") => {
            "Have you owned a pet before? Would you describe yourself as a \
             first-time owner, somewhat experienced, or very experienced?"
                .into()
        }
        _ => "Could you tell me a bit more about what you're looking for?".into(),
    }
}

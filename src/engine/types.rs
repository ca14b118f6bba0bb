// PawMatch Engine — Core types
// These are the data structures that flow through the entire engine.
// They are independent of any specific generation or embedding provider.

use serde::{Deserialize, Serialize};

// ── Preference domains ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HousingType {
    Apartment,
    House,
    HouseWithYard,
}

impl HousingType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "apartment" | "flat" => Some(HousingType::Apartment),
            "house" => Some(HousingType::House),
            "house_with_yard" | "house_with_a_yard" | "yard" => Some(HousingType::HouseWithYard),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HousingType::Apartment => "apartment",
            HousingType::House => "house",
            HousingType::HouseWithYard => "house with a yard",
        }
    }
}

/// Shared low/medium/high scale: the user's activity level and a candidate's
/// energy level are compared on the same ordinal axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnergyLevel {
    Low,
    Medium,
    High,
}

impl EnergyLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(EnergyLevel::Low),
            "medium" | "moderate" => Some(EnergyLevel::Medium),
            "high" => Some(EnergyLevel::High),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            EnergyLevel::Low => 0,
            EnergyLevel::Medium => 1,
            EnergyLevel::High => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EnergyLevel::Low => "low",
            EnergyLevel::Medium => "medium",
            EnergyLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    FirstTime,
    #[serde(rename = "some")]
    Intermediate,
    Experienced,
}

impl ExperienceLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "first_time" | "none" | "never" => Some(ExperienceLevel::FirstTime),
            "some" | "intermediate" => Some(ExperienceLevel::Intermediate),
            "experienced" | "expert" => Some(ExperienceLevel::Experienced),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            ExperienceLevel::FirstTime => 0,
            ExperienceLevel::Intermediate => 1,
            ExperienceLevel::Experienced => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExperienceLevel::FirstTime => "first-time owner",
            ExperienceLevel::Intermediate => "some experience",
            ExperienceLevel::Experienced => "experienced owner",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BudgetTier {
    Low,
    Medium,
    High,
}

impl BudgetTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(BudgetTier::Low),
            "medium" | "moderate" => Some(BudgetTier::Medium),
            "high" => Some(BudgetTier::High),
            _ => None,
        }
    }

    /// Maximum adoption fee the tier is comfortable with.
    pub fn fee_ceiling(&self) -> f64 {
        use crate::atoms::constants::*;
        match self {
            BudgetTier::Low => BUDGET_CEILING_LOW,
            BudgetTier::Medium => BUDGET_CEILING_MEDIUM,
            BudgetTier::High => BUDGET_CEILING_HIGH,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BudgetTier::Low => "low",
            BudgetTier::Medium => "medium",
            BudgetTier::High => "high",
        }
    }
}

// ── Preference record ──────────────────────────────────────────────────

/// Names of the five fields that must be filled before matching can run.
pub const REQUIRED_FIELDS: &[&str] = &[
    "housing",
    "activity",
    "has_children",
    "has_other_pets",
    "experience",
];

/// One adopter's preference record.  Every field is independently nullable:
/// `None` means "not yet stated", never "explicitly no".  Mutated exclusively
/// by the preference engine; persisted to the preference store on every
/// successful merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreferenceRecord {
    pub housing: Option<HousingType>,
    pub activity: Option<EnergyLevel>,
    pub has_children: Option<bool>,
    pub child_age: Option<u8>,
    pub has_other_pets: Option<bool>,
    pub other_pet_types: Option<Vec<String>>,
    pub experience: Option<ExperienceLevel>,
    pub budget: Option<BudgetTier>,
    pub preferred_breeds: Option<Vec<String>>,
    /// None = not yet asked; Some(true) = only the preferred breed;
    /// Some(false) = prefer it but include others.
    pub breed_strict: Option<bool>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

impl PreferenceRecord {
    /// Required fields still missing, in canonical order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.housing.is_none() {
            missing.push("housing");
        }
        if self.activity.is_none() {
            missing.push("activity");
        }
        if self.has_children.is_none() {
            missing.push("has_children");
        }
        if self.has_other_pets.is_none() {
            missing.push("has_other_pets");
        }
        if self.experience.is_none() {
            missing.push("experience");
        }
        missing
    }

    /// A record is complete when all five required fields are filled.
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// One-line human summary used in welcome-back messages and prompts.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(h) = self.housing {
            parts.push(format!("lives in a {}", h.label()));
        }
        if let Some(a) = self.activity {
            parts.push(format!("{} activity level", a.label()));
        }
        match self.has_children {
            Some(true) => match self.child_age {
                Some(age) => parts.push(format!("has children (youngest {})", age)),
                None => parts.push("has children".into()),
            },
            Some(false) => parts.push("no children".into()),
            None => {}
        }
        match self.has_other_pets {
            Some(true) => match &self.other_pet_types {
                Some(types) if !types.is_empty() => {
                    parts.push(format!("has other pets ({})", types.join(", ")))
                }
                _ => parts.push("has other pets".into()),
            },
            Some(false) => parts.push("no other pets".into()),
            None => {}
        }
        if let Some(e) = self.experience {
            parts.push(e.label().to_string());
        }
        if let Some(b) = self.budget {
            parts.push(format!("{} budget", b.label()));
        }
        if let Some(breeds) = &self.preferred_breeds {
            if !breeds.is_empty() {
                let strictness = match self.breed_strict {
                    Some(true) => " (only)",
                    Some(false) => " (preferred)",
                    None => "",
                };
                parts.push(format!("likes {}{}", breeds.join(", "), strictness));
            }
        }
        if let Some(loc) = &self.location {
            parts.push(format!("near {}", loc));
        }
        if parts.is_empty() {
            "no preferences on file".into()
        } else {
            parts.join(", ")
        }
    }
}

// ── Candidate catalog ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnimalStatus {
    Available,
    Pending,
    Adopted,
}

impl AnimalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimalStatus::Available => "available",
            AnimalStatus::Pending => "pending",
            AnimalStatus::Adopted => "adopted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(AnimalStatus::Available),
            "pending" => Some(AnimalStatus::Pending),
            "adopted" => Some(AnimalStatus::Adopted),
            _ => None,
        }
    }
}

/// One catalog row — an adoptable animal with structured attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimalRecord {
    pub id: String,
    pub name: String,
    pub species: String,
    pub breed: String,
    pub age_months: u32,
    pub energy: EnergyLevel,
    pub child_safe: bool,
    pub pet_safe: bool,
    pub fee: f64,
    pub location: String,
    pub temperament: String,
    pub description: String,
    pub status: AnimalStatus,
}

// ── Scoring output ─────────────────────────────────────────────────────

/// Named per-factor point contributions.  The raw total tops out at 125 and
/// is deliberately not normalized; presentation clamps to 100.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub energy: u32,
    pub child_safety: u32,
    pub pet_safety: u32,
    pub experience_fit: u32,
    pub budget: u32,
    pub breed: u32,
    pub location: u32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u32 {
        self.energy
            + self.child_safety
            + self.pet_safety
            + self.experience_fit
            + self.budget
            + self.breed
            + self.location
    }
}

/// Transient scoring result — one per catalog row evaluated in a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub animal: AnimalRecord,
    pub total: u32,
    pub breakdown: ScoreBreakdown,
}

// ── Recommendation result ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedPet {
    /// Real catalog id — model-claimed ids are always resolved and replaced.
    pub id: String,
    pub name: String,
    /// Integer match score 0–100 (clamped from the raw 125-point total).
    pub match_score: u8,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResult {
    /// 0–3 ranked entries.
    pub pets: Vec<RecommendedPet>,
    pub explanation: String,
}

// ── Session ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActiveFlow {
    Routing,
    CollectingPreferences,
    Qa,
}

impl ActiveFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveFlow::Routing => "routing",
            ActiveFlow::CollectingPreferences => "collecting_preferences",
            ActiveFlow::Qa => "qa",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "routing" => Some(ActiveFlow::Routing),
            "collecting_preferences" => Some(ActiveFlow::CollectingPreferences),
            "qa" => Some(ActiveFlow::Qa),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One role-tagged utterance in a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    pub created_at: String,
}

/// Breed-negotiation marker: set when a merge introduces preferred breeds
/// before strictness has been asked; cleared once the user answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreedCheck {
    pub breeds: Vec<String>,
    pub available: i64,
}

/// Full per-session state.  Loaded at the start of a turn, mutated in
/// memory, and written back only after the whole cycle succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub id: String,
    pub user_id: Option<String>,
    pub active_flow: ActiveFlow,
    pub preferences: PreferenceRecord,
    pub history: Vec<ChatTurn>,
    pub recommendations: Option<RecommendationResult>,
    pub completed: bool,
    pub pending_breed_check: Option<BreedCheck>,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionData {
    /// The `has_results` super-state: once recommendations exist, all turns
    /// go through the post-result handler.
    pub fn has_results(&self) -> bool {
        self.recommendations.is_some()
    }
}

// ── Post-result decision ───────────────────────────────────────────────

/// Structured decision returned by the generation capability after results
/// exist.  A closed tagged union — the orchestrator dispatches on it with an
/// exhaustive match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PostResultAction {
    /// Re-run scoring + selection with adjusted parameters.
    Regenerate {
        #[serde(default)]
        exclude_ids: Vec<String>,
        #[serde(default)]
        breeds: Option<Vec<String>>,
        #[serde(default)]
        breed_strict: Option<bool>,
    },
    /// Answer the question free-form.
    Answer { reply: String },
}

// ── Public API request / response shapes ───────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub welcome_message: String,
    pub is_returning_user: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_preferences: Option<PreferenceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub message: String,
    pub active_flow: ActiveFlow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<RecommendationResult>,
}

/// Read-only session introspection for the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateView {
    pub active_flow: ActiveFlow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<RecommendationResult>,
    pub history: Vec<ChatTurn>,
}

// ── Generation prompt ──────────────────────────────────────────────────

/// Provider-independent prompt: a system instruction, recent role-tagged
/// history, and the current user input.
#[derive(Debug, Clone, Default)]
pub struct GenerationPrompt {
    pub system: String,
    pub history: Vec<ChatTurn>,
    pub user: String,
}

impl GenerationPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        GenerationPrompt {
            system: system.into(),
            history: Vec::new(),
            user: user.into(),
        }
    }

    pub fn with_history(mut self, history: &[ChatTurn], limit: usize) -> Self {
        let skip = history.len().saturating_sub(limit);
        self.history = history[skip..].to_vec();
        self
    }
}

// ── Semantic cache ─────────────────────────────────────────────────────

/// A stored cache row (embedding BLOB omitted — it never leaves the store
/// layer in decoded form except for similarity scoring).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub flow: String,
    pub input: String,
    pub response: String,
    pub hit_count: i64,
    pub last_used_at: String,
    pub created_at: String,
}

/// A cache lookup result: the cached response plus how close the match was
/// (1.0 for an exact-tier hit).
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub response: String,
    pub similarity: f64,
}

/// Statistics about the response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: i64,
    pub total_hits: i64,
    pub flows: Vec<(String, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_missing_all_required() {
        let r = PreferenceRecord::default();
        assert_eq!(r.missing_fields(), REQUIRED_FIELDS.to_vec());
        assert!(!r.is_complete());
    }

    #[test]
    fn complete_record_has_no_missing_fields() {
        let r = PreferenceRecord {
            housing: Some(HousingType::HouseWithYard),
            activity: Some(EnergyLevel::High),
            has_children: Some(false),
            has_other_pets: Some(false),
            experience: Some(ExperienceLevel::FirstTime),
            ..Default::default()
        };
        assert!(r.missing_fields().is_empty());
        assert!(r.is_complete());
    }

    #[test]
    fn optional_fields_never_block_completion() {
        let r = PreferenceRecord {
            housing: Some(HousingType::Apartment),
            activity: Some(EnergyLevel::Low),
            has_children: Some(true),
            has_other_pets: Some(true),
            experience: Some(ExperienceLevel::Experienced),
            breed_strict: None, // never asked — still complete
            budget: None,
            ..Default::default()
        };
        assert!(r.is_complete());
    }

    #[test]
    fn energy_parse_and_ordinal() {
        assert_eq!(EnergyLevel::parse("High"), Some(EnergyLevel::High));
        assert_eq!(EnergyLevel::parse(" moderate "), Some(EnergyLevel::Medium));
        assert_eq!(EnergyLevel::parse("zzz"), None);
        assert_eq!(EnergyLevel::High.ordinal() - EnergyLevel::Low.ordinal(), 2);
    }

    #[test]
    fn housing_parse_variants() {
        assert_eq!(
            HousingType::parse("house with yard"),
            Some(HousingType::HouseWithYard)
        );
        assert_eq!(HousingType::parse("Apartment"), Some(HousingType::Apartment));
    }

    #[test]
    fn post_result_action_roundtrip() {
        let json = r#"{"action":"regenerate","exclude_ids":["a1"],"breed_strict":false}"#;
        let action: PostResultAction = serde_json::from_str(json).unwrap();
        match action {
            PostResultAction::Regenerate {
                exclude_ids,
                breeds,
                breed_strict,
            } => {
                assert_eq!(exclude_ids, vec!["a1".to_string()]);
                assert_eq!(breeds, None);
                assert_eq!(breed_strict, Some(false));
            }
            PostResultAction::Answer { .. } => panic!("expected regenerate"),
        }
    }

    #[test]
    fn summary_reads_naturally() {
        let r = PreferenceRecord {
            housing: Some(HousingType::House),
            activity: Some(EnergyLevel::Medium),
            has_children: Some(true),
            child_age: Some(6),
            has_other_pets: Some(false),
            experience: Some(ExperienceLevel::Intermediate),
            location: Some("Portland".into()),
            ..Default::default()
        };
        let s = r.summary();
        assert!(s.contains("lives in a house"));
        assert!(s.contains("youngest 6"));
        assert!(s.contains("near Portland"));
    }
}

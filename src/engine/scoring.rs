// PawMatch Engine — Candidate Scoring
//
// Two-phase ranking: hard filters exclude at the query boundary, soft
// scores rank whatever survives.  The only permitted relaxation is the
// breed constraint — an empty strict-breed result re-queries without it,
// keeping location and safety intact.  An empty set after that is a
// legitimate "no matches", not an error.

use crate::atoms::constants::*;
use crate::atoms::error::EngineResult;
use crate::engine::store::{CatalogFilter, MatchStore};
use crate::engine::types::{
    AnimalRecord, EnergyLevel, ExperienceLevel, PreferenceRecord, ScoreBreakdown, ScoredCandidate,
};
use log::info;

// ── Difficulty estimation ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    fn ordinal(&self) -> u8 {
        match self {
            Difficulty::Easy => 0,
            Difficulty::Medium => 1,
            Difficulty::Hard => 2,
        }
    }
}

/// Temperament keywords that make an animal more demanding to handle.
const HARD_TEMPERAMENT: &[&str] = &[
    "stubborn",
    "dominant",
    "reactive",
    "anxious",
    "territorial",
    "strong-willed",
    "independent",
    "vocal",
];

/// Temperament keywords that make an animal forgiving for a novice.
const EASY_TEMPERAMENT: &[&str] = &[
    "calm",
    "gentle",
    "easygoing",
    "patient",
    "docile",
    "affectionate",
    "eager to please",
];

/// Estimate how demanding a candidate is: energy contributes most, puppies
/// and kittens add work, temperament keywords adjust either way.
pub fn estimate_difficulty(animal: &AnimalRecord) -> Difficulty {
    let mut points: i32 = match animal.energy {
        EnergyLevel::Low => 0,
        EnergyLevel::Medium => 1,
        EnergyLevel::High => 2,
    };

    // Young-age bonus: anything under a year needs training time.
    if animal.age_months < 12 {
        points += 1;
    }

    let temperament = animal.temperament.to_lowercase();
    if HARD_TEMPERAMENT.iter().any(|k| temperament.contains(k)) {
        points += 1;
    }
    if EASY_TEMPERAMENT.iter().any(|k| temperament.contains(k)) {
        points -= 1;
    }

    match points {
        i32::MIN..=0 => Difficulty::Easy,
        1..=2 => Difficulty::Medium,
        _ => Difficulty::Hard,
    }
}

// ── Soft-score factors ─────────────────────────────────────────────────

/// Energy alignment on the ordinal low/medium/high axis:
/// exact 30, one step off 15, two steps 0.
fn energy_score(prefs: &PreferenceRecord, animal: &AnimalRecord) -> u32 {
    match prefs.activity {
        Some(activity) => {
            let distance = activity.ordinal().abs_diff(animal.energy.ordinal());
            match distance {
                0 => ENERGY_WEIGHT,
                1 => ENERGY_NEAR_WEIGHT,
                _ => 0,
            }
        }
        None => 0,
    }
}

/// Safety bonuses are vacuously full when the constraint was not requested:
/// an adopter without children doesn't care either way, so no candidate is
/// penalized for it.
fn child_safety_score(prefs: &PreferenceRecord, animal: &AnimalRecord) -> u32 {
    match prefs.has_children {
        Some(true) => {
            if animal.child_safe {
                CHILD_SAFETY_WEIGHT
            } else {
                0
            }
        }
        _ => CHILD_SAFETY_WEIGHT,
    }
}

fn pet_safety_score(prefs: &PreferenceRecord, animal: &AnimalRecord) -> u32 {
    match prefs.has_other_pets {
        Some(true) => {
            if animal.pet_safe {
                PET_SAFETY_WEIGHT
            } else {
                0
            }
        }
        _ => PET_SAFETY_WEIGHT,
    }
}

/// Experience fit: full points when the adopter's tier covers the animal's
/// estimated difficulty, partial when it is one tier harder, nothing beyond.
fn experience_score(prefs: &PreferenceRecord, animal: &AnimalRecord) -> u32 {
    let Some(experience) = prefs.experience else {
        return 0;
    };
    let difficulty = estimate_difficulty(animal);
    let gap = difficulty.ordinal() as i32 - experience.ordinal() as i32;
    match gap {
        i32::MIN..=0 => EXPERIENCE_WEIGHT,
        1 => EXPERIENCE_NEAR_WEIGHT,
        _ => 0,
    }
}

fn budget_score(prefs: &PreferenceRecord, animal: &AnimalRecord) -> u32 {
    match prefs.budget {
        Some(tier) if animal.fee <= tier.fee_ceiling() => BUDGET_WEIGHT,
        Some(_) => 0,
        None => 0,
    }
}

/// Breed preference: substring match in either direction, case-insensitive.
/// "Labrador" matches "Labrador Retriever Mix" and vice versa.
fn breed_score(prefs: &PreferenceRecord, animal: &AnimalRecord) -> u32 {
    let Some(breeds) = &prefs.preferred_breeds else {
        return 0;
    };
    let animal_breed = animal.breed.to_lowercase();
    if animal_breed.is_empty() {
        return 0;
    }
    let matched = breeds.iter().any(|b| {
        let b = b.to_lowercase();
        !b.is_empty() && (animal_breed.contains(&b) || b.contains(&animal_breed))
    });
    if matched {
        BREED_WEIGHT
    } else {
        0
    }
}

/// Location is already a hard filter; the bonus is informational so the
/// breakdown still shows the factor.
fn location_score(prefs: &PreferenceRecord, animal: &AnimalRecord) -> u32 {
    let Some(location) = &prefs.location else {
        return 0;
    };
    if animal
        .location
        .to_lowercase()
        .contains(&location.to_lowercase())
    {
        LOCATION_WEIGHT
    } else {
        0
    }
}

/// Score a single candidate against a preference record.
pub fn score_one(prefs: &PreferenceRecord, animal: AnimalRecord) -> ScoredCandidate {
    let breakdown = ScoreBreakdown {
        energy: energy_score(prefs, &animal),
        child_safety: child_safety_score(prefs, &animal),
        pet_safety: pet_safety_score(prefs, &animal),
        experience_fit: experience_score(prefs, &animal),
        budget: budget_score(prefs, &animal),
        breed: breed_score(prefs, &animal),
        location: location_score(prefs, &animal),
    };
    ScoredCandidate {
        total: breakdown.total(),
        animal,
        breakdown,
    }
}

// ── Query + rank ───────────────────────────────────────────────────────

/// Build the hard-filter predicate set from a preference record.
pub fn hard_filter(prefs: &PreferenceRecord) -> CatalogFilter {
    let strict_breeds = match (prefs.breed_strict, &prefs.preferred_breeds) {
        (Some(true), Some(breeds)) if !breeds.is_empty() => Some(breeds.clone()),
        _ => None,
    };
    CatalogFilter {
        require_child_safe: prefs.has_children == Some(true),
        require_pet_safe: prefs.has_other_pets == Some(true),
        breeds: strict_breeds,
        location: prefs.location.clone(),
    }
}

/// Rank catalog candidates against a preference record: hard-filter (with
/// the breed-only fallback), soft-score, stable-sort descending, truncate.
pub fn score_candidates(
    store: &MatchStore,
    prefs: &PreferenceRecord,
    limit: usize,
) -> EngineResult<Vec<ScoredCandidate>> {
    let filter = hard_filter(prefs);
    let fetch_limit = limit * CANDIDATE_OVERFETCH_FACTOR;

    let mut rows = store.query_available(&filter, fetch_limit)?;

    // Fallback relaxation: only the breed constraint may be dropped, and
    // only when it was the active constraint on an empty result.
    if rows.is_empty() && filter.breeds.is_some() {
        info!("[scoring] Strict breed filter matched nothing — relaxing breed only");
        rows = store.query_available(&filter.without_breeds(), fetch_limit)?;
    }

    if rows.is_empty() {
        info!("[scoring] No candidates passed hard filters");
        return Ok(Vec::new());
    }

    let mut scored: Vec<ScoredCandidate> = rows
        .into_iter()
        .map(|animal| score_one(prefs, animal))
        .collect();

    // Stable sort: ties keep catalog order.
    scored.sort_by(|a, b| b.total.cmp(&a.total));
    scored.truncate(limit);

    info!(
        "[scoring] Ranked {} candidate(s), top score {}",
        scored.len(),
        scored.first().map(|s| s.total).unwrap_or(0)
    );
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{AnimalStatus, BudgetTier, HousingType};

    fn animal(id: &str) -> AnimalRecord {
        AnimalRecord {
            id: id.into(),
            name: format!("pet-{}", id),
            species: "dog".into(),
            breed: "Mixed".into(),
            age_months: 36,
            energy: EnergyLevel::Medium,
            child_safe: true,
            pet_safe: true,
            fee: 150.0,
            location: "Austin".into(),
            temperament: String::new(),
            description: String::new(),
            status: AnimalStatus::Available,
        }
    }

    fn prefs() -> PreferenceRecord {
        PreferenceRecord {
            housing: Some(HousingType::House),
            activity: Some(EnergyLevel::Medium),
            has_children: Some(false),
            has_other_pets: Some(false),
            experience: Some(ExperienceLevel::Intermediate),
            ..Default::default()
        }
    }

    #[test]
    fn exact_energy_match_scores_full() {
        let scored = score_one(&prefs(), animal("a1"));
        assert_eq!(scored.breakdown.energy, ENERGY_WEIGHT);
    }

    #[test]
    fn one_step_energy_scores_half() {
        let mut a = animal("a1");
        a.energy = EnergyLevel::High;
        let scored = score_one(&prefs(), a);
        assert_eq!(scored.breakdown.energy, ENERGY_NEAR_WEIGHT);
    }

    #[test]
    fn two_step_energy_scores_zero() {
        let mut p = prefs();
        p.activity = Some(EnergyLevel::Low);
        let mut a = animal("a1");
        a.energy = EnergyLevel::High;
        let scored = score_one(&p, a);
        assert_eq!(scored.breakdown.energy, 0);
    }

    #[test]
    fn safety_bonus_vacuous_when_not_requested() {
        // No children stated → full child-safety points even for an
        // unsafe-with-children animal.
        let mut a = animal("a1");
        a.child_safe = false;
        let scored = score_one(&prefs(), a);
        assert_eq!(scored.breakdown.child_safety, CHILD_SAFETY_WEIGHT);
    }

    #[test]
    fn difficulty_buckets() {
        let mut easy = animal("a1");
        easy.energy = EnergyLevel::Low;
        easy.temperament = "calm and gentle".into();
        assert_eq!(estimate_difficulty(&easy), Difficulty::Easy);

        let mut hard = animal("a2");
        hard.energy = EnergyLevel::High;
        hard.age_months = 6;
        hard.temperament = "stubborn, very vocal".into();
        assert_eq!(estimate_difficulty(&hard), Difficulty::Hard);
    }

    #[test]
    fn experience_gap_grades_down() {
        let mut p = prefs();
        p.experience = Some(ExperienceLevel::FirstTime);

        // Medium-difficulty animal is one tier above a first-timer.
        let scored = score_one(&p, animal("a1"));
        assert_eq!(scored.breakdown.experience_fit, EXPERIENCE_NEAR_WEIGHT);

        // An experienced owner covers anything.
        p.experience = Some(ExperienceLevel::Experienced);
        let scored = score_one(&p, animal("a2"));
        assert_eq!(scored.breakdown.experience_fit, EXPERIENCE_WEIGHT);
    }

    #[test]
    fn budget_ceiling_is_inclusive() {
        let mut p = prefs();
        p.budget = Some(BudgetTier::Low);
        let mut a = animal("a1");
        a.fee = 100.0;
        assert_eq!(score_one(&p, a).breakdown.budget, BUDGET_WEIGHT);

        let mut over = animal("a2");
        over.fee = 100.01;
        assert_eq!(score_one(&p, over).breakdown.budget, 0);
    }

    #[test]
    fn breed_substring_matches_either_direction() {
        let mut p = prefs();
        p.preferred_breeds = Some(vec!["Labrador Retriever".into()]);
        let mut a = animal("a1");
        a.breed = "labrador".into();
        assert_eq!(score_one(&p, a).breakdown.breed, BREED_WEIGHT);
    }

    #[test]
    fn max_total_is_125() {
        let p = PreferenceRecord {
            activity: Some(EnergyLevel::Medium),
            has_children: Some(false),
            has_other_pets: Some(false),
            experience: Some(ExperienceLevel::Experienced),
            budget: Some(BudgetTier::High),
            preferred_breeds: Some(vec!["Mixed".into()]),
            location: Some("Austin".into()),
            ..Default::default()
        };
        let scored = score_one(&p, animal("a1"));
        assert_eq!(scored.total, 125);
    }

    // ── Query-boundary tests ───────────────────────────────────────────

    fn seeded() -> MatchStore {
        let store = MatchStore::open_in_memory().unwrap();
        let mut a1 = animal("a1");
        a1.breed = "Labrador".into();
        let mut a2 = animal("a2");
        a2.breed = "Beagle".into();
        let mut a3 = animal("a3");
        a3.breed = "Poodle".into();
        a3.child_safe = false;
        for a in [&a1, &a2, &a3] {
            store.upsert_animal(a).unwrap();
        }
        store
    }

    #[test]
    fn hard_filter_invariant_children() {
        let store = seeded();
        let mut p = prefs();
        p.has_children = Some(true);
        let results = score_candidates(&store, &p, 10).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|s| s.animal.child_safe));
    }

    #[test]
    fn hard_filter_invariant_location() {
        let store = seeded();
        let mut elsewhere = animal("a4");
        elsewhere.location = "Denver".into();
        store.upsert_animal(&elsewhere).unwrap();

        let mut p = prefs();
        p.location = Some("austin".into());
        let results = score_candidates(&store, &p, 10).unwrap();
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|s| s.animal.location.to_lowercase().contains("austin")));
    }

    #[test]
    fn breed_fallback_relaxes_breed_only() {
        let store = seeded();
        let mut p = prefs();
        p.location = Some("Austin".into());
        p.preferred_breeds = Some(vec!["Dalmatian".into()]); // zero matches
        p.breed_strict = Some(true);

        let results = score_candidates(&store, &p, 10).unwrap();
        // The non-breed-filtered, location-filtered set comes back.
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|s| s.animal.location.to_lowercase().contains("austin")));
    }

    #[test]
    fn no_fallback_without_breed_constraint() {
        let store = seeded();
        let mut p = prefs();
        p.location = Some("Nowhere".into());
        let results = score_candidates(&store, &p, 10).unwrap();
        // Location is never relaxed — empty is a legitimate outcome.
        assert!(results.is_empty());
    }

    #[test]
    fn ties_keep_catalog_order() {
        let store = MatchStore::open_in_memory().unwrap();
        for id in ["first", "second", "third"] {
            store.upsert_animal(&animal(id)).unwrap();
        }
        let results = score_candidates(&store, &prefs(), 10).unwrap();
        let ids: Vec<&str> = results.iter().map(|s| s.animal.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn truncates_to_limit_after_ranking() {
        let store = MatchStore::open_in_memory().unwrap();
        for i in 0..8 {
            let mut a = animal(&format!("a{}", i));
            // Make a5 the standout so truncation must happen after ranking.
            a.energy = if i == 5 {
                EnergyLevel::Medium
            } else {
                EnergyLevel::High
            };
            store.upsert_animal(&a).unwrap();
        }
        let mut p = prefs();
        p.activity = Some(EnergyLevel::Medium);
        let results = score_candidates(&store, &p, 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].animal.id, "a5");
    }
}

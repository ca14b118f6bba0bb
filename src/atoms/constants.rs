// ── PawMatch Atoms: Constants ──────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic strings,
// makes auditing easier, and keeps every layer's code self-documenting.

// ── Preference sanitization ────────────────────────────────────────────────
// String values the extraction model sometimes emits instead of omitting a
// field.  Matched case-insensitively after trimming; a matching value is
// dropped from the delta and never reaches the stored record.
pub const RESERVED_PLACEHOLDERS: &[&str] = &["unknown", "none", "n/a", "not specified", ""];

// ── Soft-score weights ─────────────────────────────────────────────────────
// Additive point budget per factor.  The raw total tops out at 125; the
// user-facing match score clamps to 100.
pub const ENERGY_WEIGHT: u32 = 30;
pub const ENERGY_NEAR_WEIGHT: u32 = 15; // one ordinal step off
pub const CHILD_SAFETY_WEIGHT: u32 = 25;
pub const PET_SAFETY_WEIGHT: u32 = 20;
pub const EXPERIENCE_WEIGHT: u32 = 15;
pub const EXPERIENCE_NEAR_WEIGHT: u32 = 7; // one tier harder than stated experience
pub const BUDGET_WEIGHT: u32 = 10;
pub const BREED_WEIGHT: u32 = 15;
pub const LOCATION_WEIGHT: u32 = 10;

// ── Budget tier fee ceilings (USD) ─────────────────────────────────────────
pub const BUDGET_CEILING_LOW: f64 = 100.0;
pub const BUDGET_CEILING_MEDIUM: f64 = 300.0;
pub const BUDGET_CEILING_HIGH: f64 = 1000.0;

// ── Matching limits ────────────────────────────────────────────────────────
// Catalog queries over-fetch so soft scoring has room to re-rank before
// truncation.
pub const CANDIDATE_OVERFETCH_FACTOR: usize = 3;
pub const MAX_RECOMMENDATIONS: usize = 3;

// ── Semantic cache defaults ────────────────────────────────────────────────
// When the store is at capacity, an insert first evicts one batch of the
// lowest-hit-count, oldest-last-used entries.
pub const CACHE_DEFAULT_MAX_ENTRIES: usize = 500;
pub const CACHE_DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;
pub const CACHE_EVICT_DIVISOR: usize = 10; // evict ~10% of capacity per batch

// ── Session housekeeping ───────────────────────────────────────────────────
// Sessions with no activity past the TTL are deleted together with their
// history rows.  Stored history per session is capped; older turns are
// pruned after each completed cycle.
pub const SESSION_DEFAULT_TTL_SECS: i64 = 86_400; // 24 hours
pub const SESSION_MAX_STORED_TURNS: i64 = 200;
pub const HISTORY_PROMPT_TURNS: usize = 10; // recent turns included in prompts

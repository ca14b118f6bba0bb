// ── PawMatch Atoms ─────────────────────────────────────────────────────────
// Cross-cutting primitives with no engine dependencies.

pub mod constants;
pub mod error;

// ── PawMatch Atoms: Error Types ────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (DB, Network, Generation…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `SessionNotFound` is the only variant a caller is expected to branch on;
//     everything else is recovered inside the engine and turned into a
//     conversational fallback before it reaches the user.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Generation capability HTTP or API-level failure (non-secret detail only).
    #[error("Generation error: {0}")]
    Generation(String),

    /// The capability returned output that does not match the expected schema.
    #[error("Malformed structured output: {0}")]
    MalformedOutput(String),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown or expired session id — the caller's responsibility.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Create a generation error with a message.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }
}

// ── Migration bridge: String → EngineError ─────────────────────────────────
// Allows `?` on helpers that build error messages with `format!`.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

use super::MatchStore;
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::types::{
    ActiveFlow, BreedCheck, ChatRole, ChatTurn, PreferenceRecord, RecommendationResult,
    SessionData,
};
use log::info;
use rusqlite::params;

impl MatchStore {
    // ── Session CRUD ───────────────────────────────────────────────────

    pub fn create_session(&self, session: &SessionData) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (id, user_id, active_flow, preferences, completed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                session.user_id,
                session.active_flow.as_str(),
                serde_json::to_string(&session.preferences)?,
                session.completed as i64,
            ],
        )?;
        Ok(())
    }

    /// Load a session with its full stored history (oldest first).
    /// Returns SessionNotFound for unknown ids — the crate's one hard error.
    pub fn get_session(&self, id: &str) -> EngineResult<SessionData> {
        let conn = self.conn.lock();

        let row = conn.query_row(
            "SELECT id, user_id, active_flow, preferences, recommendations,
                    completed, pending_breed_check, created_at, updated_at
             FROM sessions WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        );

        let (id, user_id, flow, prefs, recs, completed, breed_check, created_at, updated_at) =
            match row {
                Ok(r) => r,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Err(EngineError::SessionNotFound(id.to_string()))
                }
                Err(e) => return Err(e.into()),
            };

        let preferences: PreferenceRecord = serde_json::from_str(&prefs).unwrap_or_default();
        let recommendations: Option<RecommendationResult> =
            recs.and_then(|j| serde_json::from_str(&j).ok());
        let pending_breed_check: Option<BreedCheck> =
            breed_check.and_then(|j| serde_json::from_str(&j).ok());

        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM session_messages
             WHERE session_id = ?1 ORDER BY created_at, rowid",
        )?;
        let history: Vec<ChatTurn> = stmt
            .query_map(params![id], |row| {
                let role: String = row.get(0)?;
                Ok(ChatTurn {
                    role: if role == "assistant" {
                        ChatRole::Assistant
                    } else {
                        ChatRole::User
                    },
                    content: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(SessionData {
            id,
            user_id,
            active_flow: ActiveFlow::parse(&flow).unwrap_or(ActiveFlow::Routing),
            preferences,
            history,
            recommendations,
            completed: completed != 0,
            pending_breed_check,
            created_at,
            updated_at,
        })
    }

    /// Write back a session's mutable state after a successful cycle.
    /// History rows are appended separately via `append_turn`.
    pub fn update_session(&self, session: &SessionData) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET
                active_flow = ?2,
                preferences = ?3,
                recommendations = ?4,
                completed = ?5,
                pending_breed_check = ?6,
                updated_at = datetime('now')
             WHERE id = ?1",
            params![
                session.id,
                session.active_flow.as_str(),
                serde_json::to_string(&session.preferences)?,
                session
                    .recommendations
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                session.completed as i64,
                session
                    .pending_breed_check
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            ],
        )?;
        Ok(())
    }

    /// Append one utterance to a session's stored history.
    pub fn append_turn(&self, session_id: &str, role: ChatRole, content: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO session_messages (id, session_id, role, content)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                uuid::Uuid::new_v4().to_string(),
                session_id,
                role.as_str(),
                content
            ],
        )?;
        Ok(())
    }

    /// Keep only the most recent `keep` turns of a session's history.
    /// Returns the number of rows deleted.
    pub fn trim_session_history(&self, session_id: &str, keep: i64) -> EngineResult<usize> {
        let conn = self.conn.lock();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM session_messages WHERE session_id = ?1",
            params![session_id],
            |r| r.get(0),
        )?;
        if total <= keep {
            return Ok(0);
        }

        let deleted = conn.execute(
            "DELETE FROM session_messages WHERE session_id = ?1 AND id NOT IN (
                SELECT id FROM session_messages WHERE session_id = ?1
                ORDER BY created_at DESC, rowid DESC LIMIT ?2
            )",
            params![session_id, keep],
        )?;

        if deleted > 0 {
            info!(
                "[store] Trimmed {} old turns from session {} (kept {})",
                deleted, session_id, keep
            );
        }
        Ok(deleted)
    }

    /// Explicitly close a session, deleting it and its history.
    pub fn delete_session(&self, id: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM session_messages WHERE session_id = ?1",
            params![id],
        )?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Delete sessions (and, via cascade, their history) idle past the TTL.
    /// Returns the number of sessions deleted.
    pub fn prune_expired_sessions(&self, ttl_secs: i64) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE updated_at < datetime('now', ?1)",
            params![format!("-{} seconds", ttl_secs)],
        )?;
        if deleted > 0 {
            info!(
                "[store] Pruned {} expired session(s) older than {}s",
                deleted, ttl_secs
            );
        }
        Ok(deleted)
    }
}

// Database schema and migrations for the PawMatch store.
// Called once at startup by MatchStore::open() after WAL is enabled.
// Adding a new table or column: append an idempotent CREATE TABLE IF NOT
// EXISTS or ALTER TABLE … ADD COLUMN (errors are silently swallowed) at the
// end of run_migrations() — never modify existing SQL to keep upgrade paths
// clean.

use crate::atoms::error::EngineResult;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    // ── Core tables ──────────────────────────────────────────────────
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            active_flow TEXT NOT NULL DEFAULT 'routing',
            preferences TEXT NOT NULL DEFAULT '{}',
            recommendations TEXT,
            completed INTEGER NOT NULL DEFAULT 0,
            pending_breed_check TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_updated
            ON sessions(updated_at);

        CREATE TABLE IF NOT EXISTS session_messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_session_messages_session
            ON session_messages(session_id, created_at);

        CREATE TABLE IF NOT EXISTS user_preferences (
            user_id TEXT PRIMARY KEY,
            record TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS animals (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            species TEXT NOT NULL DEFAULT 'dog',
            breed TEXT NOT NULL DEFAULT '',
            age_months INTEGER NOT NULL DEFAULT 0,
            energy TEXT NOT NULL DEFAULT 'medium',
            child_safe INTEGER NOT NULL DEFAULT 0,
            pet_safe INTEGER NOT NULL DEFAULT 0,
            fee REAL NOT NULL DEFAULT 0.0,
            location TEXT NOT NULL DEFAULT '',
            temperament TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'available'
        );

        CREATE INDEX IF NOT EXISTS idx_animals_status ON animals(status);
        CREATE INDEX IF NOT EXISTS idx_animals_breed ON animals(breed);

        CREATE TABLE IF NOT EXISTS response_cache (
            hash TEXT NOT NULL,
            flow TEXT NOT NULL,
            input TEXT NOT NULL DEFAULT '',
            embedding BLOB,
            response TEXT NOT NULL DEFAULT '',
            metadata TEXT,
            hit_count INTEGER NOT NULL DEFAULT 0,
            last_used_at TEXT NOT NULL DEFAULT (datetime('now')),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (hash, flow)
        );

        CREATE INDEX IF NOT EXISTS idx_response_cache_flow
            ON response_cache(flow);

        CREATE TABLE IF NOT EXISTS engine_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
    ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn in_memory_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrations_run_cleanly() {
        let conn = in_memory_db();
        let result = run_migrations(&conn);
        assert!(result.is_ok(), "First migration run failed: {:?}", result);
    }

    #[test]
    fn migrations_idempotent() {
        let conn = in_memory_db();
        run_migrations(&conn).unwrap();
        let result = run_migrations(&conn);
        assert!(result.is_ok(), "Second migration run failed: {:?}", result);
    }

    #[test]
    fn core_tables_created() {
        let conn = in_memory_db();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"session_messages".to_string()));
        assert!(tables.contains(&"user_preferences".to_string()));
        assert!(tables.contains(&"animals".to_string()));
        assert!(tables.contains(&"response_cache".to_string()));
        assert!(tables.contains(&"engine_config".to_string()));
    }
}

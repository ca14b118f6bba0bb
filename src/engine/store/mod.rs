// PawMatch Engine — Match Store
// Stores sessions, preferences, the candidate catalog, and the response
// cache in SQLite via rusqlite, behind one connection protected by a Mutex.
//
// Module layout:
//   schema       — idempotent migrations, run once at open
//   sessions     — session rows + conversation history + TTL pruning
//   preferences  — last-known preference record per user (get/put)
//   catalog      — candidate queries at the hard-filter boundary
//   cache        — response-cache rows (exact get, flow scan, eviction)
//   config       — key/value engine config store
//   vector       — f32<->BLOB codec + cosine similarity

use crate::atoms::error::EngineResult;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

mod cache;
mod catalog;
mod config;
mod preferences;
mod schema;
mod sessions;
pub(crate) mod vector;

pub use catalog::CatalogFilter;

/// Default on-disk location for the engine database.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pawmatch")
        .join("pawmatch.db")
}

/// Thread-safe database wrapper.
pub struct MatchStore {
    /// The SQLite connection, protected by a Mutex.
    conn: Mutex<Connection>,
}

impl MatchStore {
    /// Open (or create) the database at `path` and initialize tables.
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        info!("[store] Opening match store at {:?}", path);

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();

        schema::run_migrations(&conn)?;

        Ok(MatchStore {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store with the full schema.  Used by tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        Ok(MatchStore {
            conn: Mutex::new(conn),
        })
    }
}

use super::MatchStore;
use crate::atoms::error::EngineResult;
use crate::engine::types::{CacheEntry, CacheStats};
use log::info;
use rusqlite::params;

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        hash: row.get(0)?,
        flow: row.get(1)?,
        input: row.get(2)?,
        response: row.get(3)?,
        hit_count: row.get(4)?,
        last_used_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl MatchStore {
    // ── Response-cache rows ────────────────────────────────────────────

    /// Exact-tier lookup by (hash, flow).
    pub fn cache_get_exact(&self, hash: &str, flow: &str) -> EngineResult<Option<CacheEntry>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT hash, flow, input, response, hit_count, last_used_at, created_at
             FROM response_cache WHERE hash = ?1 AND flow = ?2",
            params![hash, flow],
            entry_from_row,
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record a hit: bump the counter and refresh the last-used timestamp.
    pub fn cache_touch(&self, hash: &str, flow: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE response_cache
             SET hit_count = hit_count + 1, last_used_at = datetime('now')
             WHERE hash = ?1 AND flow = ?2",
            params![hash, flow],
        )?;
        Ok(())
    }

    /// All embedded rows for a flow tag, for the approximate-tier scan.
    /// The store is bounded, so a full scan stays cheap.
    pub fn cache_scan_flow(&self, flow: &str) -> EngineResult<Vec<(String, Vec<u8>, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT hash, embedding, response FROM response_cache
             WHERE flow = ?1 AND embedding IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![flow], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Upsert keyed by the exact hash — repeated identical inputs overwrite
    /// rather than duplicate.
    pub fn cache_upsert(
        &self,
        hash: &str,
        flow: &str,
        input: &str,
        embedding: Option<&[u8]>,
        response: &str,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO response_cache (hash, flow, input, embedding, response)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(hash, flow) DO UPDATE SET
                input = excluded.input,
                embedding = excluded.embedding,
                response = excluded.response,
                last_used_at = datetime('now')",
            params![hash, flow, input, embedding, response],
        )?;
        Ok(())
    }

    pub fn cache_count(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM response_cache", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Evict up to `batch` entries: lowest hit-count first, oldest last-used
    /// breaking ties.  Returns the number of rows deleted.
    pub fn cache_evict(&self, batch: usize) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM response_cache WHERE rowid IN (
                SELECT rowid FROM response_cache
                ORDER BY hit_count ASC, last_used_at ASC
                LIMIT ?1
            )",
            params![batch as i64],
        )?;
        if deleted > 0 {
            info!("[cache] Evicted {} entr(ies) from response cache", deleted);
        }
        Ok(deleted)
    }

    pub fn cache_stats(&self) -> EngineResult<CacheStats> {
        let conn = self.conn.lock();
        let total_entries: i64 =
            conn.query_row("SELECT COUNT(*) FROM response_cache", [], |r| r.get(0))?;
        let total_hits: i64 = conn.query_row(
            "SELECT COALESCE(SUM(hit_count), 0) FROM response_cache",
            [],
            |r| r.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT flow, COUNT(*) FROM response_cache GROUP BY flow ORDER BY COUNT(*) DESC",
        )?;
        let flows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(CacheStats {
            total_entries,
            total_hits,
            flows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_overwrites_same_key() {
        let store = MatchStore::open_in_memory().unwrap();
        store.cache_upsert("h1", "qa", "hi", None, "first").unwrap();
        store.cache_upsert("h1", "qa", "hi", None, "second").unwrap();

        assert_eq!(store.cache_count().unwrap(), 1);
        let entry = store.cache_get_exact("h1", "qa").unwrap().unwrap();
        assert_eq!(entry.response, "second");
    }

    #[test]
    fn hash_is_scoped_by_flow_tag() {
        let store = MatchStore::open_in_memory().unwrap();
        store.cache_upsert("h1", "qa", "hi", None, "qa answer").unwrap();
        store
            .cache_upsert("h1", "router", "hi", None, "router answer")
            .unwrap();

        assert_eq!(store.cache_count().unwrap(), 2);
        let qa = store.cache_get_exact("h1", "qa").unwrap().unwrap();
        assert_eq!(qa.response, "qa answer");
        assert!(store.cache_get_exact("h1", "selection").unwrap().is_none());
    }

    #[test]
    fn touch_bumps_hit_count() {
        let store = MatchStore::open_in_memory().unwrap();
        store.cache_upsert("h1", "qa", "hi", None, "r").unwrap();
        store.cache_touch("h1", "qa").unwrap();
        store.cache_touch("h1", "qa").unwrap();

        let entry = store.cache_get_exact("h1", "qa").unwrap().unwrap();
        assert_eq!(entry.hit_count, 2);
    }

    #[test]
    fn evict_prefers_cold_entries() {
        let store = MatchStore::open_in_memory().unwrap();
        store.cache_upsert("cold", "qa", "a", None, "r").unwrap();
        store.cache_upsert("warm", "qa", "b", None, "r").unwrap();
        store.cache_touch("warm", "qa").unwrap();

        let deleted = store.cache_evict(1).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.cache_get_exact("cold", "qa").unwrap().is_none());
        assert!(store.cache_get_exact("warm", "qa").unwrap().is_some());
    }

    #[test]
    fn scan_skips_rows_without_embeddings() {
        let store = MatchStore::open_in_memory().unwrap();
        store.cache_upsert("h1", "qa", "a", None, "r1").unwrap();
        store
            .cache_upsert("h2", "qa", "b", Some(&[0u8; 8]), "r2")
            .unwrap();

        let rows = store.cache_scan_flow("qa").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "h2");
    }

    #[test]
    fn stats_aggregate_hits_and_flows() {
        let store = MatchStore::open_in_memory().unwrap();
        store.cache_upsert("h1", "qa", "a", None, "r").unwrap();
        store.cache_upsert("h2", "router", "b", None, "r").unwrap();
        store.cache_touch("h1", "qa").unwrap();

        let stats = store.cache_stats().unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.flows.len(), 2);
    }
}

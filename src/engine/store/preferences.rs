use super::MatchStore;
use crate::atoms::error::EngineResult;
use crate::engine::types::PreferenceRecord;
use rusqlite::params;

impl MatchStore {
    // ── Preference store (get/put keyed by user id) ────────────────────

    /// Last-known preference record for a user, if any.
    pub fn get_preferences(&self, user_id: &str) -> EngineResult<Option<PreferenceRecord>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT record FROM user_preferences WHERE user_id = ?1",
            params![user_id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(json) => Ok(serde_json::from_str(&json).ok()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert a user's preference record.  Called after every successful
    /// merge; records are never deleted by this crate.
    pub fn put_preferences(&self, user_id: &str, record: &PreferenceRecord) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_preferences (user_id, record, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(user_id) DO UPDATE SET
                record = excluded.record,
                updated_at = datetime('now')",
            params![user_id, serde_json::to_string(record)?],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{EnergyLevel, HousingType};

    #[test]
    fn missing_user_returns_none() {
        let store = MatchStore::open_in_memory().unwrap();
        assert!(store.get_preferences("u1").unwrap().is_none());
    }

    #[test]
    fn put_then_get_roundtrip() {
        let store = MatchStore::open_in_memory().unwrap();
        let record = PreferenceRecord {
            housing: Some(HousingType::Apartment),
            activity: Some(EnergyLevel::Low),
            ..Default::default()
        };
        store.put_preferences("u1", &record).unwrap();

        let loaded = store.get_preferences("u1").unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn put_overwrites_existing() {
        let store = MatchStore::open_in_memory().unwrap();
        let mut record = PreferenceRecord::default();
        store.put_preferences("u1", &record).unwrap();

        record.has_children = Some(true);
        store.put_preferences("u1", &record).unwrap();

        let loaded = store.get_preferences("u1").unwrap().unwrap();
        assert_eq!(loaded.has_children, Some(true));
    }

    #[test]
    fn corrupted_record_reads_as_none() {
        let store = MatchStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO user_preferences (user_id, record) VALUES ('u1', 'not json')",
                [],
            )
            .unwrap();
        }
        assert!(store.get_preferences("u1").unwrap().is_none());
    }
}

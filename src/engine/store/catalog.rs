use super::MatchStore;
use crate::atoms::error::EngineResult;
use crate::engine::types::{AnimalRecord, AnimalStatus, EnergyLevel};
use rusqlite::params;

/// The hard-filter predicate set applied at the data-query boundary.
/// Candidates failing any predicate are excluded entirely; everything kept
/// goes on to soft scoring.
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub require_child_safe: bool,
    pub require_pet_safe: bool,
    /// Case-insensitive substring match against the breed column; any listed
    /// breed may match.
    pub breeds: Option<Vec<String>>,
    /// Case-insensitive substring match against the location column.
    pub location: Option<String>,
}

impl CatalogFilter {
    /// A copy of this filter with the breed constraint dropped — the only
    /// relaxation the fallback pass is allowed to make.
    pub fn without_breeds(&self) -> Self {
        CatalogFilter {
            breeds: None,
            ..self.clone()
        }
    }
}

fn animal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnimalRecord> {
    let energy: String = row.get(5)?;
    let status: String = row.get(12)?;
    Ok(AnimalRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        species: row.get(2)?,
        breed: row.get(3)?,
        age_months: row.get::<_, i64>(4)? as u32,
        energy: EnergyLevel::parse(&energy).unwrap_or(EnergyLevel::Medium),
        child_safe: row.get::<_, i64>(6)? != 0,
        pet_safe: row.get::<_, i64>(7)? != 0,
        fee: row.get(8)?,
        location: row.get(9)?,
        temperament: row.get(10)?,
        description: row.get(11)?,
        status: AnimalStatus::parse(&status).unwrap_or(AnimalStatus::Pending),
    })
}

const ANIMAL_COLUMNS: &str = "id, name, species, breed, age_months, energy, child_safe, \
     pet_safe, fee, location, temperament, description, status";

impl MatchStore {
    // ── Candidate catalog queries ──────────────────────────────────────

    /// Available candidates passing the hard filters, in catalog (insertion)
    /// order, up to `limit` rows.
    pub fn query_available(
        &self,
        filter: &CatalogFilter,
        limit: usize,
    ) -> EngineResult<Vec<AnimalRecord>> {
        let conn = self.conn.lock();

        let mut sql = format!(
            "SELECT {} FROM animals WHERE status = 'available'",
            ANIMAL_COLUMNS
        );
        let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if filter.require_child_safe {
            sql.push_str(" AND child_safe = 1");
        }
        if filter.require_pet_safe {
            sql.push_str(" AND pet_safe = 1");
        }
        if let Some(breeds) = &filter.breeds {
            if !breeds.is_empty() {
                let mut parts = Vec::new();
                for breed in breeds {
                    bound.push(Box::new(format!("%{}%", breed.to_lowercase())));
                    parts.push(format!("LOWER(breed) LIKE ?{}", bound.len()));
                }
                sql.push_str(&format!(" AND ({})", parts.join(" OR ")));
            }
        }
        if let Some(location) = &filter.location {
            bound.push(Box::new(format!("%{}%", location.to_lowercase())));
            sql.push_str(&format!(" AND LOWER(location) LIKE ?{}", bound.len()));
        }

        bound.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY rowid LIMIT ?{}", bound.len()));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();
        let animals = stmt
            .query_map(param_refs.as_slice(), animal_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(animals)
    }

    /// Live availability count for a breed list (optionally scoped to a
    /// location) — used by the breed-negotiation sub-protocol.
    pub fn count_breed_available(
        &self,
        breeds: &[String],
        location: Option<&str>,
    ) -> EngineResult<i64> {
        if breeds.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();

        let mut sql = "SELECT COUNT(*) FROM animals WHERE status = 'available'".to_string();
        let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        let mut parts = Vec::new();
        for breed in breeds {
            bound.push(Box::new(format!("%{}%", breed.to_lowercase())));
            parts.push(format!("LOWER(breed) LIKE ?{}", bound.len()));
        }
        sql.push_str(&format!(" AND ({})", parts.join(" OR ")));

        if let Some(loc) = location {
            bound.push(Box::new(format!("%{}%", loc.to_lowercase())));
            sql.push_str(&format!(" AND LOWER(location) LIKE ?{}", bound.len()));
        }

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |r| r.get(0))?;
        Ok(count)
    }

    // ── Catalog administration ─────────────────────────────────────────

    /// Insert or replace a catalog row.  The surrounding service maintains
    /// the bounded candidate set through this.
    pub fn upsert_animal(&self, animal: &AnimalRecord) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO animals
                (id, name, species, breed, age_months, energy, child_safe,
                 pet_safe, fee, location, temperament, description, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                animal.id,
                animal.name,
                animal.species,
                animal.breed,
                animal.age_months as i64,
                animal.energy.label(),
                animal.child_safe as i64,
                animal.pet_safe as i64,
                animal.fee,
                animal.location,
                animal.temperament,
                animal.description,
                animal.status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn set_animal_status(&self, id: &str, status: AnimalStatus) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE animals SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    }
}

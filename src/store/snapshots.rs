use rusqlite::{params, OptionalExtension};

use super::DbPool;
use crate::types::error::TaxonomyError;
use crate::types::TeamSnapshot;

/// Team and supplier lists applied by the user's last successful run
pub fn load_snapshot(pool: &DbPool, user_id: &str) -> Result<Option<TeamSnapshot>, TaxonomyError> {
    let conn = pool.get()?;
    let raw: Option<String> = conn
        .query_row(
            "SELECT snapshot FROM team_snapshots WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn save_snapshot(pool: &DbPool, user_id: &str, snapshot: &TeamSnapshot) -> Result<(), TaxonomyError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO team_snapshots (user_id, snapshot, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
            snapshot = excluded.snapshot,
            updated_at = excluded.updated_at",
        params![
            user_id,
            serde_json::to_string(snapshot)?,
            chrono::Utc::now().timestamp_millis()
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{create_pool, in_memory_pool};
    use crate::types::{Supplier, TeamMember};

    #[test]
    fn test_missing_snapshot_is_none() {
        let pool = in_memory_pool().unwrap();
        assert!(load_snapshot(&pool, "nobody").unwrap().is_none());
    }

    #[test]
    fn test_snapshot_overwritten() {
        let pool = in_memory_pool().unwrap();
        let mut snapshot = TeamSnapshot {
            team: vec![TeamMember::new("Hailey"), TeamMember::new("Aaron")],
            suppliers: vec![Supplier::new("Lennox", ["lennox.com"])],
        };
        save_snapshot(&pool, "user-1", &snapshot).unwrap();

        snapshot.team.pop();
        save_snapshot(&pool, "user-1", &snapshot).unwrap();

        let loaded = load_snapshot(&pool, "user-1").unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("labels.db");
        let snapshot = TeamSnapshot {
            team: vec![TeamMember::new("Hailey")],
            suppliers: Vec::new(),
        };

        {
            let pool = create_pool(&db_path).unwrap();
            save_snapshot(&pool, "user-1", &snapshot).unwrap();
        }

        let pool = create_pool(&db_path).unwrap();
        assert_eq!(load_snapshot(&pool, "user-1").unwrap(), Some(snapshot));
    }
}

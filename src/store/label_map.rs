use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection};

use super::DbPool;
use crate::providers::ProviderKind;
use crate::sync::{EntryState, LabelMap, LabelMapEntry};
use crate::types::error::TaxonomyError;
use crate::types::LogicalPath;

pub fn load_label_map(
    pool: &DbPool,
    user_id: &str,
    provider: ProviderKind,
) -> Result<LabelMap, TaxonomyError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT path, provider_id, remote_path, state, created_at
         FROM label_map WHERE user_id = ?1 AND provider = ?2",
    )?;

    let rows = stmt.query_map(params![user_id, provider.as_str()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (path, provider_id, remote_path, state, created_at) = row?;
        let state = EntryState::parse(&state)
            .ok_or_else(|| TaxonomyError::Database(format!("Unknown entry state '{}'", state)))?;

        entries.push(LabelMapEntry {
            path: serde_json::from_str::<LogicalPath>(&path)?,
            provider,
            provider_id,
            remote_path: serde_json::from_str::<LogicalPath>(&remote_path)?,
            state,
            created_at: Utc
                .timestamp_millis_opt(created_at)
                .single()
                .unwrap_or_else(Utc::now),
        });
    }

    Ok(LabelMap::from_entries(provider, entries))
}

/// Insert or update a single entry
pub fn save_entry(pool: &DbPool, user_id: &str, entry: &LabelMapEntry) -> Result<(), TaxonomyError> {
    let conn = pool.get()?;
    upsert(&conn, user_id, entry)
}

pub fn delete_entry(
    pool: &DbPool,
    user_id: &str,
    provider: ProviderKind,
    path: &LogicalPath,
) -> Result<(), TaxonomyError> {
    let conn = pool.get()?;
    conn.execute(
        "DELETE FROM label_map WHERE user_id = ?1 AND provider = ?2 AND path = ?3",
        params![user_id, provider.as_str(), serde_json::to_string(path)?],
    )?;
    Ok(())
}

/// Make the stored map for this user and provider equal to `map`
pub fn replace_label_map(pool: &DbPool, user_id: &str, map: &LabelMap) -> Result<(), TaxonomyError> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    tx.execute(
        "DELETE FROM label_map WHERE user_id = ?1 AND provider = ?2",
        params![user_id, map.provider().as_str()],
    )?;
    for entry in map.entries() {
        upsert(&tx, user_id, entry)?;
    }

    tx.commit()?;
    Ok(())
}

fn upsert(conn: &Connection, user_id: &str, entry: &LabelMapEntry) -> Result<(), TaxonomyError> {
    let now = Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO label_map
            (user_id, provider, path, provider_id, remote_path, state, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(user_id, provider, path) DO UPDATE SET
            provider_id = excluded.provider_id,
            remote_path = excluded.remote_path,
            state = excluded.state,
            updated_at = excluded.updated_at",
        params![
            user_id,
            entry.provider.as_str(),
            serde_json::to_string(&entry.path)?,
            entry.provider_id,
            serde_json::to_string(&entry.remote_path)?,
            entry.state.as_str(),
            entry.created_at.timestamp_millis(),
            now,
        ],
    )?;
    Ok(())
}

use rusqlite::Connection;

use crate::types::error::TaxonomyError;

pub fn initialize_schema(conn: &Connection) -> Result<(), TaxonomyError> {
    conn.execute_batch("
        -- Logical path -> provider id, one row per node per user and provider
        CREATE TABLE IF NOT EXISTS label_map (
            user_id         TEXT NOT NULL,
            provider        TEXT NOT NULL,      -- 'gmail' | 'outlook'
            path            TEXT NOT NULL,      -- JSON array of segment names
            provider_id     TEXT NOT NULL,
            remote_path     TEXT NOT NULL,      -- JSON array, differs from path once archived
            state           TEXT NOT NULL DEFAULT 'active',
            created_at      INTEGER NOT NULL,   -- unix epoch ms
            updated_at      INTEGER NOT NULL,
            PRIMARY KEY (user_id, provider, path)
        );

        CREATE INDEX IF NOT EXISTS idx_label_map_user
            ON label_map(user_id, provider, state);

        -- Last applied team and supplier lists
        CREATE TABLE IF NOT EXISTS team_snapshots (
            user_id         TEXT PRIMARY KEY,
            snapshot        TEXT NOT NULL,      -- JSON TeamSnapshot
            updated_at      INTEGER NOT NULL
        );
    ")?;

    Ok(())
}

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::fs;
use std::path::Path;

use super::schema::initialize_schema;
use crate::types::error::TaxonomyError;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open (or create) the identifier map database
pub fn create_pool(db_path: &Path) -> Result<DbPool, TaxonomyError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // Per-connection settings; journal mode below persists in the file
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA temp_store = MEMORY;",
    )?;
    initialize_schema(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory database
///
/// Each SQLite memory connection is its own database, so the pool is capped
/// at one connection.
pub fn in_memory_pool() -> Result<DbPool, TaxonomyError> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager)?;

    let conn = pool.get()?;
    initialize_schema(&conn)?;

    Ok(pool)
}

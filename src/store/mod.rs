//! SQLite persistence for identifier maps and team snapshots
//!
//! All functions take a `&DbPool` and run synchronously; calls are short
//! single-row statements.

pub mod label_map;
mod pool;
mod schema;
pub mod snapshots;

pub use pool::{create_pool, in_memory_pool, DbPool};

//! Label synchronization
//!
//! - `map`: the logical path -> provider id map
//! - `retry`: backoff policy shared by every adapter call
//! - `engine`: idempotent reconciliation of a canonical tree

pub mod engine;
pub mod map;
pub mod retry;

pub use engine::{
    ensure_path, MapPersistence, NodeFailure, ReconcileOutcome, SyncEngine, SyncEvent,
};
pub use map::{EntryState, LabelMap, LabelMapEntry};
pub use retry::RetryPolicy;

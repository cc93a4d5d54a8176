//! Process-wide shared state

pub mod run_locks;

pub use run_locks::{RunGuard, RunLocks};

//! Business logic services
//!
//! Orchestration that ties composition, reconfiguration, sync and storage
//! together. Reusable across contexts (CLI, tests, a hosting service).
//!
//! Services should:
//! - Take provider adapters as trait objects so fakes can stand in
//! - Use TaxonomyError for input errors and report provider failures in results
//! - Be easily testable in isolation

mod provisioning;

pub use provisioning::*;

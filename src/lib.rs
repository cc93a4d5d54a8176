//! Mailbox taxonomy provisioning
//!
//! Composes a business-specific label taxonomy and keeps it materialized in
//! a Gmail or Outlook mailbox as the business's team and suppliers change.
//!
//! ## Module Organization
//!
//! - `schema/`: Canonical tree composition from bundled templates
//! - `providers/`: Gmail label and Outlook folder adapters
//! - `sync/`: Reconciliation engine, identifier map, retry policy
//! - `reconfigure/`: Team and supplier diffs, archive and restore
//! - `autodiscovery/`: Mail provider detection from an email address
//! - `store/`: SQLite persistence for maps and snapshots
//! - `services/`: Provisioning orchestration
//! - `state/`: Process-wide run locks
//! - `config/`: Configuration management
//! - `types/`: Shared data structures and errors

pub mod autodiscovery;
pub mod config;
pub mod providers;
pub mod reconfigure;
pub mod schema;
pub mod services;
pub mod state;
pub mod store;
pub mod sync;
pub mod types;

pub use types::error::{ProviderError, Result, TaxonomyError};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for logging
///
/// Can be overridden with the RUST_LOG environment variable.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            // Debug build: show debug logs for our crate, info for others
            EnvFilter::new("mailbox_taxonomy=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    // Logs go to stderr so stdout stays machine-readable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

//! Team and supplier reconfiguration
//!
//! Compares the previously applied snapshot with the new one and disposes of
//! labels for people and vendors that were removed. Labels are moved under a
//! holding category rather than deleted so their mail history stays
//! reachable; a re-added name gets its old label back.

mod apply;
mod diff;

pub use apply::{ReconfigureOutcome, Reconfigurator};
pub use diff::{diff_teams, ReconfigurationDiff};

use serde::{Deserialize, Serialize};

/// What happens to the label of a removed member or supplier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Move under the archive category
    #[default]
    Archive,
    /// Delete when the provider reports no messages, archive otherwise
    DeleteIfEmpty,
}

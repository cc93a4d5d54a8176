use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::{identity_key, Supplier, TeamMember, TeamSnapshot};

/// Membership changes between two applied snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconfigurationDiff {
    pub added_members: Vec<TeamMember>,
    pub removed_members: Vec<TeamMember>,
    pub added_suppliers: Vec<Supplier>,
    pub removed_suppliers: Vec<Supplier>,
}

impl ReconfigurationDiff {
    pub fn is_empty(&self) -> bool {
        self.added_members.is_empty()
            && self.removed_members.is_empty()
            && self.added_suppliers.is_empty()
            && self.removed_suppliers.is_empty()
    }
}

/// Compare two snapshots by trimmed, case-insensitive name
///
/// Renaming a member is a removal plus an addition. Order follows the input
/// lists.
pub fn diff_teams(previous: &TeamSnapshot, next: &TeamSnapshot) -> ReconfigurationDiff {
    ReconfigurationDiff {
        added_members: only_in(&next.team, &previous.team, |m| &m.name),
        removed_members: only_in(&previous.team, &next.team, |m| &m.name),
        added_suppliers: only_in(&next.suppliers, &previous.suppliers, |s| &s.name),
        removed_suppliers: only_in(&previous.suppliers, &next.suppliers, |s| &s.name),
    }
}

fn only_in<T: Clone>(left: &[T], right: &[T], name: impl Fn(&T) -> &String) -> Vec<T> {
    let right: HashSet<String> = right.iter().map(|item| identity_key(name(item))).collect();
    let mut seen = HashSet::new();

    left.iter()
        .filter(|item| {
            let key = identity_key(name(item));
            !key.is_empty() && !right.contains(&key) && seen.insert(key)
        })
        .cloned()
        .collect()
}

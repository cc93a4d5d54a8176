//! Schema composition
//!
//! `compose` is a pure function of its inputs: the same template, extension,
//! team and supplier lists always produce the same tree. Base categories come
//! first in template order, extension additions follow, and injected team and
//! supplier leaves are appended in input order.

use label_templates::{BusinessExtension, PlaceholderKind, TemplateNode};
use thiserror::Error;
use tracing::{debug, warn};

use super::{CanonicalTree, SchemaNode};
use crate::types::error::TaxonomyError;
use crate::types::{identity_key, LogicalPath, Supplier, TeamMember};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("Business extension '{extension}' references unknown category '{category}'")]
    UnknownCategory { extension: String, category: String },

    #[error("Business extension '{extension}' would create duplicate category '{category}'")]
    DuplicateCategory { extension: String, category: String },

    #[error("No {kind:?} placeholder category in business extension '{extension}'")]
    MissingPlaceholder {
        extension: String,
        kind: PlaceholderKind,
    },
}

impl From<CompositionError> for TaxonomyError {
    fn from(err: CompositionError) -> Self {
        TaxonomyError::Composition(err.to_string())
    }
}

/// Compose the canonical tree for a bundled business type
pub fn compose_for_business(
    business_type: &str,
    team: &[TeamMember],
    suppliers: &[Supplier],
) -> Result<CanonicalTree, TaxonomyError> {
    let base = label_templates::base_template()?;
    let extension = label_templates::lookup_extension(business_type)?;
    Ok(compose(base, extension, team, suppliers)?)
}

/// Merge base template and extension, then inject team and supplier leaves
pub fn compose(
    base: &[TemplateNode],
    extension: &BusinessExtension,
    team: &[TeamMember],
    suppliers: &[Supplier],
) -> Result<CanonicalTree, CompositionError> {
    let mut roots: Vec<SchemaNode> = base.iter().map(SchemaNode::from).collect();

    apply_renames(&mut roots, extension)?;
    apply_removals(&mut roots, extension)?;
    apply_additions(&mut roots, extension)?;
    apply_subcategories(&mut roots, extension)?;
    attach_keywords(&mut roots, extension);

    let team_parent = find_placeholder(&mut roots, PlaceholderKind::Team).ok_or_else(|| {
        CompositionError::MissingPlaceholder {
            extension: extension.key.clone(),
            kind: PlaceholderKind::Team,
        }
    })?;
    inject_leaves(team_parent, team.iter().map(|m| m.name.as_str()));

    let supplier_parent =
        find_placeholder(&mut roots, PlaceholderKind::Supplier).ok_or_else(|| {
            CompositionError::MissingPlaceholder {
                extension: extension.key.clone(),
                kind: PlaceholderKind::Supplier,
            }
        })?;
    inject_leaves(supplier_parent, suppliers.iter().map(|s| s.name.as_str()));

    for root in &mut roots {
        inherit_color(root);
    }

    Ok(CanonicalTree {
        business_key: extension.key.clone(),
        roots,
    })
}

fn position_of(roots: &[SchemaNode], name: &str) -> Option<usize> {
    let wanted = identity_key(name);
    roots.iter().position(|n| identity_key(&n.name) == wanted)
}

fn apply_renames(
    roots: &mut [SchemaNode],
    extension: &BusinessExtension,
) -> Result<(), CompositionError> {
    for (from, to) in &extension.renames {
        let idx = position_of(roots, from).ok_or_else(|| CompositionError::UnknownCategory {
            extension: extension.key.clone(),
            category: from.clone(),
        })?;

        if let Some(existing) = position_of(roots, to) {
            if existing != idx {
                return Err(CompositionError::DuplicateCategory {
                    extension: extension.key.clone(),
                    category: to.clone(),
                });
            }
        }

        roots[idx].name = to.trim().to_string();
    }
    Ok(())
}

fn apply_removals(
    roots: &mut Vec<SchemaNode>,
    extension: &BusinessExtension,
) -> Result<(), CompositionError> {
    for name in &extension.removals {
        let idx = position_of(roots, name).ok_or_else(|| CompositionError::UnknownCategory {
            extension: extension.key.clone(),
            category: name.clone(),
        })?;
        roots.remove(idx);
    }
    Ok(())
}

fn apply_additions(
    roots: &mut Vec<SchemaNode>,
    extension: &BusinessExtension,
) -> Result<(), CompositionError> {
    for addition in &extension.additions {
        if position_of(roots, &addition.name).is_some() {
            return Err(CompositionError::DuplicateCategory {
                extension: extension.key.clone(),
                category: addition.name.clone(),
            });
        }
        roots.push(SchemaNode::from(addition));
    }
    Ok(())
}

fn apply_subcategories(
    roots: &mut [SchemaNode],
    extension: &BusinessExtension,
) -> Result<(), CompositionError> {
    for (target, children) in &extension.subcategories {
        let idx = position_of(roots, target).ok_or_else(|| CompositionError::UnknownCategory {
            extension: extension.key.clone(),
            category: target.clone(),
        })?;

        let parent = &mut roots[idx];
        for child in children {
            if parent.has_child(&child.name) {
                debug!("Skipping duplicate subcategory {}/{}", parent.name, child.name);
                continue;
            }
            parent.children.push(SchemaNode::from(child));
        }
    }
    Ok(())
}

fn attach_keywords(roots: &mut [SchemaNode], extension: &BusinessExtension) {
    for (category, keywords) in &extension.intent_keywords {
        match position_of(roots, category) {
            Some(idx) => roots[idx].keywords = keywords.clone(),
            None => debug!(
                "Extension '{}' has keywords for unknown category '{}'",
                extension.key, category
            ),
        }
    }
}

fn find_placeholder(nodes: &mut [SchemaNode], kind: PlaceholderKind) -> Option<&mut SchemaNode> {
    for node in nodes {
        if node.placeholder == Some(kind) {
            return Some(node);
        }
        if let Some(found) = find_placeholder(&mut node.children, kind) {
            return Some(found);
        }
    }
    None
}

fn inject_leaves<'a>(parent: &mut SchemaNode, names: impl Iterator<Item = &'a str>) {
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if parent.has_child(name) {
            debug!("'{}' already present under {}, not injecting", name, parent.name);
            continue;
        }

        // Siblings must flatten to distinct routing keys
        let key = segment_key(name);
        if key.is_empty() || parent.children.iter().any(|c| segment_key(&c.name) == key) {
            warn!(
                "'{}' under {} has no distinct routing key, not injecting",
                name, parent.name
            );
            continue;
        }
        parent.children.push(SchemaNode::leaf(name));
    }
}

fn segment_key(name: &str) -> String {
    LogicalPath::new([name]).flatten_key()
}

fn inherit_color(node: &mut SchemaNode) {
    for child in &mut node.children {
        if child.color.is_none() {
            child.color = node.color.clone();
        }
        inherit_color(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogicalPath;
    use label_templates::ColorSpec;
    use std::collections::BTreeMap;

    fn base() -> Vec<TemplateNode> {
        vec![
            TemplateNode {
                color: Some(ColorSpec {
                    background: "#ffad47".into(),
                    text: "#ffffff".into(),
                }),
                placeholder: Some(PlaceholderKind::Team),
                children: vec![TemplateNode::leaf("Unassigned")],
                ..TemplateNode::leaf("MANAGER")
            },
            TemplateNode {
                placeholder: Some(PlaceholderKind::Supplier),
                ..TemplateNode::leaf("SUPPLIERS")
            },
            TemplateNode {
                children: vec![TemplateNode::leaf("Emergency Repairs")],
                ..TemplateNode::leaf("URGENT")
            },
        ]
    }

    fn extension() -> BusinessExtension {
        let mut subcategories = BTreeMap::new();
        subcategories.insert(
            "SUPPLIERS".to_string(),
            vec![TemplateNode::leaf("Carrier"), TemplateNode::leaf("Trane")],
        );
        BusinessExtension {
            key: "test".into(),
            display_name: "Test".into(),
            additions: vec![TemplateNode::leaf("SERVICE")],
            subcategories,
            ..Default::default()
        }
    }

    fn names(nodes: &[SchemaNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_template_order_then_additions() {
        let tree = compose(&base(), &extension(), &[], &[]).unwrap();
        assert_eq!(names(&tree.roots), vec!["MANAGER", "SUPPLIERS", "URGENT", "SERVICE"]);
        assert_eq!(names(&tree.roots[1].children), vec!["Carrier", "Trane"]);
    }

    #[test]
    fn test_injects_in_input_order_and_skips_duplicates() {
        let team = vec![
            TeamMember::new("Hailey"),
            TeamMember::new("unassigned"),
            TeamMember::new("Aaron"),
        ];
        let suppliers = vec![
            Supplier::new("Lennox", ["lennox.com"]),
            Supplier::new("CARRIER", ["carrier.com"]),
        ];

        let tree = compose(&base(), &extension(), &team, &suppliers).unwrap();

        assert_eq!(
            names(&tree.roots[0].children),
            vec!["Unassigned", "Hailey", "Aaron"]
        );
        assert_eq!(
            names(&tree.roots[1].children),
            vec!["Carrier", "Trane", "Lennox"]
        );
    }

    #[test]
    fn test_injected_names_keep_routing_keys_distinct() {
        let suppliers = vec![
            Supplier::new("Lennox & Sons", ["lennox.com"]),
            Supplier::new("Lennox Sons", ["lennoxsons.com"]),
            Supplier::new("!!!", Vec::<String>::new()),
        ];

        let tree = compose(&base(), &extension(), &[], &suppliers).unwrap();

        assert_eq!(
            names(&tree.roots[1].children),
            vec!["Carrier", "Trane", "Lennox & Sons"]
        );
        let keys = tree.flattened_keys();
        let unique: std::collections::BTreeSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn test_compose_is_deterministic() {
        let team = vec![TeamMember::new("Hailey"), TeamMember::new("Aaron")];
        let suppliers = vec![Supplier::new("Lennox", ["lennox.com"])];

        let first = compose(&base(), &extension(), &team, &suppliers).unwrap();
        let second = compose(&base(), &extension(), &team, &suppliers).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.flattened_keys(), second.flattened_keys());
    }

    #[test]
    fn test_rename_keeps_placeholder() {
        let mut ext = extension();
        ext.renames.insert("MANAGER".into(), "TEAM".into());

        let tree = compose(&base(), &ext, &[TeamMember::new("Hailey")], &[]).unwrap();
        assert_eq!(
            tree.placeholder_path(PlaceholderKind::Team),
            Some(LogicalPath::new(["TEAM"]))
        );
        assert!(tree.contains_path(&LogicalPath::new(["TEAM", "Hailey"])));
    }

    #[test]
    fn test_rename_to_existing_category_fails() {
        let mut ext = extension();
        ext.renames.insert("MANAGER".into(), "urgent".into());

        let err = compose(&base(), &ext, &[], &[]).unwrap_err();
        assert!(matches!(err, CompositionError::DuplicateCategory { .. }));
    }

    #[test]
    fn test_missing_placeholder_is_an_error() {
        let mut ext = extension();
        ext.subcategories.clear();
        ext.removals.push("SUPPLIERS".into());

        let err = compose(&base(), &ext, &[], &[Supplier::new("Lennox", ["lennox.com"])])
            .unwrap_err();
        assert_eq!(
            err,
            CompositionError::MissingPlaceholder {
                extension: "test".into(),
                kind: PlaceholderKind::Supplier,
            }
        );
    }

    #[test]
    fn test_unknown_subcategory_target_fails() {
        let mut ext = extension();
        ext.subcategories
            .insert("NOPE".into(), vec![TemplateNode::leaf("Child")]);

        let err = compose(&base(), &ext, &[], &[]).unwrap_err();
        assert!(matches!(err, CompositionError::UnknownCategory { .. }));
    }

    #[test]
    fn test_children_inherit_parent_color() {
        let tree = compose(&base(), &extension(), &[TeamMember::new("Hailey")], &[]).unwrap();
        let hailey = tree
            .find(&LogicalPath::new(["MANAGER", "Hailey"]))
            .unwrap();
        assert_eq!(hailey.color, tree.roots[0].color);
    }

    #[test]
    fn test_hvac_fresh_provisioning_tree() {
        let tree = compose_for_business(
            "HVAC",
            &[TeamMember::new("Hailey")],
            &[Supplier::new("Lennox", ["lennox.com"])],
        )
        .unwrap();

        let manager = tree.find(&LogicalPath::new(["MANAGER"])).unwrap();
        assert!(manager.has_child("Hailey"));

        let suppliers = tree.find(&LogicalPath::new(["SUPPLIERS"])).unwrap();
        assert_eq!(
            names(&suppliers.children),
            vec!["Carrier", "Trane", "Goodman", "Rheem", "Lennox"]
        );

        let matcher = tree.intent_matcher().unwrap();
        assert_eq!(matcher.best_match("Furnace down, no heat!"), Some("URGENT"));
    }

    #[test]
    fn test_electrician_renames_urgent() {
        let tree = compose_for_business("electrician", &[], &[]).unwrap();
        assert!(tree.contains_path(&LogicalPath::new(["EMERGENCY", "Power Outage"])));
        assert!(!tree.contains_path(&LogicalPath::new(["URGENT"])));
    }

    #[test]
    fn test_unknown_business_type() {
        let err = compose_for_business("bakery", &[], &[]).unwrap_err();
        assert!(matches!(err, TaxonomyError::Template(_)));
    }
}

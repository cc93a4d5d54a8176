use once_cell::sync::Lazy;

use crate::{BusinessExtension, TemplateError, TemplateNode};

static BASE_JSON: &str = include_str!("../data/base.json");
static EXTENSIONS_JSON: &str = include_str!("../data/extensions.json");

static BASE: Lazy<Result<Vec<TemplateNode>, String>> =
    Lazy::new(|| serde_json::from_str(BASE_JSON).map_err(|e| e.to_string()));

static EXTENSIONS: Lazy<Result<Vec<BusinessExtension>, String>> =
    Lazy::new(|| serde_json::from_str(EXTENSIONS_JSON).map_err(|e| e.to_string()));

/// Top-level categories shared by all verticals, in display order
pub fn base_template() -> Result<&'static [TemplateNode], TemplateError> {
    BASE.as_deref()
        .map_err(|e| TemplateError::InvalidData(format!("base template: {}", e)))
}

/// All bundled business extensions
pub fn extensions() -> Result<&'static [BusinessExtension], TemplateError> {
    EXTENSIONS
        .as_deref()
        .map_err(|e| TemplateError::InvalidData(format!("extensions: {}", e)))
}

/// Normalize a business type for lookup: "Pools & Spas" -> "pools_spas"
pub fn normalize_business_key(business_type: &str) -> String {
    let mut key = String::with_capacity(business_type.len());
    let mut pending_sep = false;

    for c in business_type.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            key.push(c.to_ascii_lowercase());
            pending_sep = false;
        } else {
            pending_sep = true;
        }
    }

    key
}

/// Find the extension for a business type by key, display name or alias
pub fn lookup_extension(business_type: &str) -> Result<&'static BusinessExtension, TemplateError> {
    let wanted = normalize_business_key(business_type);

    extensions()?
        .iter()
        .find(|ext| {
            normalize_business_key(&ext.key) == wanted
                || normalize_business_key(&ext.display_name) == wanted
                || ext
                    .aliases
                    .iter()
                    .any(|alias| normalize_business_key(alias) == wanted)
        })
        .ok_or_else(|| TemplateError::UnknownBusinessType(business_type.to_string()))
}

/// Display names of every bundled vertical
pub fn business_types() -> Result<Vec<&'static str>, TemplateError> {
    Ok(extensions()?
        .iter()
        .map(|ext| ext.display_name.as_str())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlaceholderKind;

    #[test]
    fn test_base_template_parses() {
        let base = base_template().unwrap();
        assert!(base.iter().any(|n| n.name == "BANKING"));

        let manager = base.iter().find(|n| n.name == "MANAGER").unwrap();
        assert_eq!(manager.placeholder, Some(PlaceholderKind::Team));
        assert!(manager.critical);

        let suppliers = base.iter().find(|n| n.name == "SUPPLIERS").unwrap();
        assert_eq!(suppliers.placeholder, Some(PlaceholderKind::Supplier));
    }

    #[test]
    fn test_normalize_business_key() {
        assert_eq!(normalize_business_key("Pools & Spas"), "pools_spas");
        assert_eq!(normalize_business_key("  HVAC "), "hvac");
        assert_eq!(normalize_business_key("heating & cooling"), "heating_cooling");
    }

    #[test]
    fn test_lookup_by_key_name_and_alias() {
        assert_eq!(lookup_extension("HVAC").unwrap().key, "hvac");
        assert_eq!(lookup_extension("Pools & Spas").unwrap().key, "pools_spas");
        assert_eq!(lookup_extension("plumber").unwrap().key, "plumbing");
        assert!(matches!(
            lookup_extension("bakery"),
            Err(TemplateError::UnknownBusinessType(_))
        ));
    }

    #[test]
    fn test_hvac_has_four_static_suppliers() {
        let hvac = lookup_extension("hvac").unwrap();
        let suppliers = hvac.subcategories.get("SUPPLIERS").unwrap();
        let names: Vec<_> = suppliers.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Carrier", "Trane", "Goodman", "Rheem"]);
    }

    #[test]
    fn test_business_types_listed() {
        let types = business_types().unwrap();
        assert_eq!(types.len(), 4);
        assert!(types.contains(&"Electrician"));
    }
}

//! The catalog of concrete control-plane actions and wildcard matching.
//!
//! Role action sets may contain concrete `resourceType:verb` entries, the
//! verb wildcard `resourceType:*`, or the full wildcard `*`. The catalog is
//! the closed list of concrete actions the control plane dispatches; it backs
//! `GET /authz/actions` and wildcard expansion in profile resolution.

/// Every concrete action known to the control plane, grouped by resource
/// type. Kept sorted within each group.
pub const CATALOG: &[&str] = &[
    "buildplane:create",
    "buildplane:delete",
    "buildplane:update",
    "buildplane:view",
    "component:create",
    "component:delete",
    "component:deploy",
    "component:update",
    "component:view",
    "dataplane:create",
    "dataplane:delete",
    "dataplane:update",
    "dataplane:view",
    "environment:create",
    "environment:delete",
    "environment:update",
    "environment:view",
    "project:create",
    "project:delete",
    "project:update",
    "project:view",
    "role:create",
    "role:delete",
    "role:update",
    "role:view",
    "rolemapping:create",
    "rolemapping:delete",
    "rolemapping:update",
    "rolemapping:view",
    "workload:create",
    "workload:delete",
    "workload:update",
    "workload:view",
];

/// Check whether a role action entry matches a requested action.
///
/// - `*` matches any action.
/// - `component:*` matches `component:view`, `component:deploy`, ...
/// - anything else matches only itself.
pub fn matches(pattern: &str, action: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern == action {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(":*") {
        return action
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with(':') && rest.len() > 1);
    }
    false
}

/// Expand a role action entry into concrete actions. Wildcards expand
/// against the catalog; a concrete entry expands to itself even when the
/// catalog does not list it (roles may name actions of newer resource
/// types).
pub fn expand(pattern: &str) -> Vec<String> {
    if pattern == "*" {
        return CATALOG.iter().map(|a| a.to_string()).collect();
    }
    if pattern.ends_with(":*") {
        return CATALOG
            .iter()
            .filter(|a| matches(pattern, a))
            .map(|a| a.to_string())
            .collect();
    }
    vec![pattern.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("component:view", "component:view"));
        assert!(!matches("component:view", "component:delete"));
        assert!(!matches("component:view", "project:view"));
    }

    #[test]
    fn test_verb_wildcard() {
        assert!(matches("component:*", "component:view"));
        assert!(matches("component:*", "component:deploy"));
        assert!(!matches("component:*", "project:view"));
        // The prefix must be a whole resource type, not a substring.
        assert!(!matches("component:*", "componentx:view"));
    }

    #[test]
    fn test_full_wildcard() {
        assert!(matches("*", "project:delete"));
        assert!(matches("*", "anything:at-all"));
    }

    #[test]
    fn test_wildcard_never_matches_empty_verb() {
        assert!(!matches("component:*", "component:"));
    }

    #[test]
    fn test_expand_verb_wildcard() {
        let expanded = expand("project:*");
        assert_eq!(
            expanded,
            vec![
                "project:create",
                "project:delete",
                "project:update",
                "project:view"
            ]
        );
    }

    #[test]
    fn test_expand_full_wildcard_is_whole_catalog() {
        assert_eq!(expand("*").len(), CATALOG.len());
    }

    #[test]
    fn test_expand_concrete_passthrough() {
        // Not in the catalog, still expands to itself.
        assert_eq!(expand("gadget:frobnicate"), vec!["gadget:frobnicate"]);
    }
}

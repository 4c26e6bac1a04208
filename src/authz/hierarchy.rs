//! Scope matching over the organization → organization-units → project →
//! component hierarchy.
//!
//! A mapping's hierarchy is a pattern: an absent level is a wildcard. The
//! request's hierarchy is always concrete. Matching is pure and total; the
//! specificity of a pattern (how many levels it pins) feeds conflict
//! resolution in the engine and is never used for equality.

use crate::authz::types::ResourceHierarchy;

/// Does the mapping scope cover the requested resource position?
///
/// Every level the scope pins must be satisfied by the request:
/// organization, project, and component by equality, organization-units by
/// intersection (membership in any one pinned OU is sufficient, mirroring
/// group-based access).
pub fn covers(scope: &ResourceHierarchy, resource: &ResourceHierarchy) -> bool {
    if let Some(org) = &scope.organization {
        if resource.organization.as_deref() != Some(org.as_str()) {
            return false;
        }
    }
    if !scope.organization_units.is_empty()
        && scope
            .organization_units
            .is_disjoint(&resource.organization_units)
    {
        return false;
    }
    if let Some(project) = &scope.project {
        if resource.project.as_deref() != Some(project.as_str()) {
            return false;
        }
    }
    if let Some(component) = &scope.component {
        if resource.component.as_deref() != Some(component.as_str()) {
            return false;
        }
    }
    true
}

/// Number of levels a scope pins (0..=4). The OU set counts as one level no
/// matter how many values it lists.
pub fn specificity(scope: &ResourceHierarchy) -> u32 {
    let mut n = 0;
    if scope.organization.is_some() {
        n += 1;
    }
    if !scope.organization_units.is_empty() {
        n += 1;
    }
    if scope.project.is_some() {
        n += 1;
    }
    if scope.component.is_some() {
        n += 1;
    }
    n
}

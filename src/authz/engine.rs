//! The decision engine.
//!
//! Evaluation runs against an immutable [`PolicySnapshot`]: filter the
//! mapping set down to candidates (entitlement, context, action, hierarchy),
//! then resolve conflicts by scope specificity with an explicit-deny bias.
//! Everything here is CPU-bound, deterministic for a given snapshot, and
//! independent of map/set iteration order.

use crate::authz::errors::AuthzError;
use crate::authz::store::PolicySnapshot;
use crate::authz::types::{
    BatchItem, ClaimsMap, ContextMap, Decision, Effect, Entitlement, ResourceHierarchy,
    RoleEntitlementMapping, SubjectContext,
};
use crate::authz::{actions, hierarchy};

/// Reason reported when no mapping matched at all (default-deny).
pub const NO_MATCHING_POLICY: &str = "no matching policy";

/// Reason reported when the policy engine is disabled and evaluation
/// short-circuits to Allow.
pub const DISABLED_REASON: &str = "authorization disabled - all access granted";

pub(crate) fn entitlement_matches(claims: &ClaimsMap, entitlement: &Entitlement) -> bool {
    claims
        .get(&entitlement.claim)
        .is_some_and(|v| v.contains(&entitlement.value))
}

/// Every key the mapping pins must be present in the request context with an
/// equal value. Unpinned keys are unconstrained.
pub(crate) fn context_matches(constraints: &ContextMap, request: &ContextMap) -> bool {
    constraints
        .iter()
        .all(|(k, v)| request.get(k).is_some_and(|rv| rv == v))
}

/// The subject's entitlement-matching mapping set. Batch evaluation computes
/// this once and reuses it for every item.
pub fn subject_mappings<'a>(
    snapshot: &'a PolicySnapshot,
    subject: &SubjectContext,
) -> Vec<&'a RoleEntitlementMapping> {
    snapshot
        .mappings
        .values()
        .filter(|m| entitlement_matches(&subject.claims, &m.entitlement))
        .collect()
}

fn role_grants(snapshot: &PolicySnapshot, role_name: &str, action: &str) -> bool {
    // A mapping whose role has been removed simply contributes no candidate;
    // absence of policy is input, not a fault.
    snapshot
        .roles
        .get(role_name)
        .is_some_and(|role| role.actions.iter().any(|p| actions::matches(p, action)))
}

/// The winning mapping for one effect: highest specificity, ties broken by
/// lowest id so the result never depends on iteration order.
fn prefer<'a>(
    current: Option<(u32, &'a RoleEntitlementMapping)>,
    specificity: u32,
    mapping: &'a RoleEntitlementMapping,
) -> Option<(u32, &'a RoleEntitlementMapping)> {
    match current {
        None => Some((specificity, mapping)),
        Some((best_spec, best)) => {
            if specificity > best_spec || (specificity == best_spec && mapping.id < best.id) {
                Some((specificity, mapping))
            } else {
                Some((best_spec, best))
            }
        }
    }
}

/// Steps 2-6 of evaluation: filter the pre-computed candidate set by
/// context, action, and hierarchy, then resolve.
///
/// An explicit deny wins whenever its specificity is greater than or equal
/// to the best allow; with no allow at all, any deny wins; with neither,
/// default-deny.
pub fn decide(
    snapshot: &PolicySnapshot,
    candidates: &[&RoleEntitlementMapping],
    action: &str,
    resource: &ResourceHierarchy,
    context: &ContextMap,
) -> Decision {
    let mut best_allow: Option<(u32, &RoleEntitlementMapping)> = None;
    let mut best_deny: Option<(u32, &RoleEntitlementMapping)> = None;

    for mapping in candidates {
        if !context_matches(&mapping.context, context) {
            continue;
        }
        if !role_grants(snapshot, &mapping.role_name, action) {
            continue;
        }
        if !hierarchy::covers(&mapping.hierarchy, resource) {
            continue;
        }
        let spec = hierarchy::specificity(&mapping.hierarchy);
        match mapping.effect {
            Effect::Allow => best_allow = prefer(best_allow, spec, mapping),
            Effect::Deny => best_deny = prefer(best_deny, spec, mapping),
        }
    }

    match (best_allow, best_deny) {
        (None, None) => Decision::deny(NO_MATCHING_POLICY),
        (None, Some((deny_spec, deny))) => explicit_deny(deny, deny_spec),
        (Some((allow_spec, allow)), deny) => match deny {
            Some((deny_spec, deny_mapping)) if deny_spec >= allow_spec => {
                explicit_deny(deny_mapping, deny_spec)
            }
            _ => Decision::allow(format!(
                "allowed by mapping {} (role `{}`, scope {}, specificity {})",
                allow.id, allow.role_name, allow.hierarchy, allow_spec
            )),
        },
    }
}

fn explicit_deny(mapping: &RoleEntitlementMapping, specificity: u32) -> Decision {
    Decision::deny(format!(
        "denied by mapping {} (role `{}`, scope {}, specificity {})",
        mapping.id, mapping.role_name, mapping.hierarchy, specificity
    ))
}

/// Full single evaluation against one snapshot.
pub fn evaluate(
    snapshot: &PolicySnapshot,
    subject: &SubjectContext,
    action: &str,
    resource: &ResourceHierarchy,
    context: &ContextMap,
) -> Decision {
    let candidates = subject_mappings(snapshot, subject);
    decide(snapshot, &candidates, action, resource, context)
}

pub fn validate_action(action: &str) -> Result<(), AuthzError> {
    if action.trim().is_empty() {
        return Err(AuthzError::InvalidRequest("action is required".into()));
    }
    Ok(())
}

/// Order-preserving batch evaluation. The entitlement-matching mapping set
/// is resolved once and shared; context, action, and hierarchy filtering run
/// per item. One malformed item yields a per-item error without aborting
/// the rest.
pub fn batch_evaluate(
    snapshot: &PolicySnapshot,
    subject: &SubjectContext,
    items: &[BatchItem],
) -> Vec<Result<Decision, AuthzError>> {
    let candidates = subject_mappings(snapshot, subject);
    items
        .iter()
        .map(|item| {
            validate_action(&item.action)?;
            Ok(decide(
                snapshot,
                &candidates,
                &item.action,
                &item.resource,
                &item.context,
            ))
        })
        .collect()
}

//! Permission introspection: "what can this subject do at this scope".
//!
//! Profile resolution answers with the set of concrete actions for which
//! [`engine::decide`] would allow — the exact same candidate filtering and
//! conflict resolution as a live evaluation, so the profile a UI renders
//! never diverges from what enforcement would decide.

use std::collections::BTreeSet;

use crate::authz::store::PolicySnapshot;
use crate::authz::types::{ContextMap, ResourceHierarchy, SubjectContext};
use crate::authz::{actions, engine};

/// Every concrete action any role could currently grant: concrete entries
/// verbatim plus catalog expansions of wildcard entries.
pub fn known_actions(snapshot: &PolicySnapshot) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for role in snapshot.roles.values() {
        for pattern in &role.actions {
            out.extend(actions::expand(pattern));
        }
    }
    out
}

/// Actions the subject is granted at the (possibly wildcard-heavy) scope.
pub fn resolve(
    snapshot: &PolicySnapshot,
    subject: &SubjectContext,
    scope: &ResourceHierarchy,
) -> BTreeSet<String> {
    let candidates = engine::subject_mappings(snapshot, subject);
    let context = ContextMap::new();
    known_actions(snapshot)
        .into_iter()
        .filter(|action| engine::decide(snapshot, &candidates, action, scope, &context).allowed)
        .collect()
}

//! Policy storage.
//!
//! The engine reads through [`PolicyStore::snapshot`]: an immutable,
//! atomically swapped view of every role and mapping. Readers clone the
//! `Arc` and evaluate against a consistent snapshot; writers rebuild the
//! snapshot under a short write lock and swap it in, so a mutation is either
//! fully visible or not at all.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::authz::errors::AuthzError;
use crate::authz::types::{Entitlement, MappingSpec, Role, RoleEntitlementMapping};

/// A consistent, immutable view of the policy set.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub roles: BTreeMap<String, Role>,
    pub mappings: BTreeMap<u64, RoleEntitlementMapping>,
}

impl PolicySnapshot {
    pub fn mappings_referencing<'a>(
        &'a self,
        role_name: &'a str,
    ) -> impl Iterator<Item = &'a RoleEntitlementMapping> {
        self.mappings
            .values()
            .filter(move |m| m.role_name == role_name)
    }
}

/// Listing filter. A claim/value pair is always matched together; the web
/// layer rejects half-supplied pairs before building one of these.
#[derive(Debug, Clone, Default)]
pub struct MappingFilter {
    pub role_name: Option<String>,
    pub entitlement: Option<Entitlement>,
}

impl MappingFilter {
    pub fn matches(&self, mapping: &RoleEntitlementMapping) -> bool {
        if let Some(role) = &self.role_name {
            if mapping.role_name != *role {
                return false;
            }
        }
        if let Some(ent) = &self.entitlement {
            if mapping.entitlement != *ent {
                return false;
            }
        }
        true
    }
}

/// Durable collection of roles and mappings. Administration goes through
/// this interface; evaluation reads a snapshot. Implementations must keep
/// every mutation atomic with respect to concurrent readers.
pub trait PolicyStore: Send + Sync {
    fn snapshot(&self) -> Arc<PolicySnapshot>;

    fn list_roles(&self) -> Vec<Role>;
    fn get_role(&self, name: &str) -> Result<Role, AuthzError>;
    fn add_role(&self, role: Role) -> Result<(), AuthzError>;
    fn update_role(
        &self,
        name: &str,
        actions: BTreeSet<String>,
        description: Option<String>,
    ) -> Result<Role, AuthzError>;
    fn remove_role(&self, name: &str, force: bool) -> Result<(), AuthzError>;

    fn list_mappings(&self, filter: &MappingFilter) -> Vec<RoleEntitlementMapping>;
    fn add_mapping(&self, spec: MappingSpec) -> Result<RoleEntitlementMapping, AuthzError>;
    fn update_mapping(
        &self,
        id: u64,
        spec: MappingSpec,
    ) -> Result<RoleEntitlementMapping, AuthzError>;
    fn remove_mapping(&self, id: u64) -> Result<(), AuthzError>;
}

fn validate_role(role: &Role) -> Result<(), AuthzError> {
    if role.name.trim().is_empty() {
        return Err(AuthzError::InvalidRequest("role name is required".into()));
    }
    if role.actions.is_empty() {
        return Err(AuthzError::InvalidRequest(format!(
            "role `{}` must grant at least one action",
            role.name
        )));
    }
    if role.actions.iter().any(|a| a.trim().is_empty()) {
        return Err(AuthzError::InvalidRequest(format!(
            "role `{}` contains an empty action",
            role.name
        )));
    }
    Ok(())
}

fn validate_spec(spec: &MappingSpec) -> Result<(), AuthzError> {
    if spec.role_name.trim().is_empty() {
        return Err(AuthzError::InvalidRequest(
            "mapping role name is required".into(),
        ));
    }
    if spec.entitlement.claim.trim().is_empty() || spec.entitlement.value.trim().is_empty() {
        return Err(AuthzError::InvalidRequest(
            "mapping entitlement requires both claim and value".into(),
        ));
    }
    Ok(())
}

struct Inner {
    snapshot: Arc<PolicySnapshot>,
    next_mapping_id: u64,
}

/// In-memory [`PolicyStore`]. Mutations clone the current snapshot, apply
/// the change, and swap the `Arc`; in-flight evaluations keep reading the
/// snapshot they started with.
pub struct MemoryPolicyStore {
    inner: RwLock<Inner>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        MemoryPolicyStore {
            inner: RwLock::new(Inner {
                snapshot: Arc::new(PolicySnapshot::default()),
                next_mapping_id: 1,
            }),
        }
    }

    /// Install seeded roles and mappings. Seeded mappings are marked
    /// system-managed and thereby frozen against the administrative API.
    /// Called once at startup, before the store is shared.
    pub fn install_seed(
        &self,
        roles: Vec<Role>,
        mappings: Vec<MappingSpec>,
    ) -> Result<(), AuthzError> {
        let mut inner = self.inner.write();
        let mut next = PolicySnapshot::clone(&inner.snapshot);

        for role in roles {
            validate_role(&role)?;
            if next.roles.contains_key(&role.name) {
                return Err(AuthzError::InvalidSeed(format!(
                    "role `{}` is declared more than once",
                    role.name
                )));
            }
            next.roles.insert(role.name.clone(), role);
        }

        for spec in mappings {
            validate_spec(&spec)?;
            if !next.roles.contains_key(&spec.role_name) {
                return Err(AuthzError::InvalidSeed(format!(
                    "mapping references undeclared role `{}`",
                    spec.role_name
                )));
            }
            if let Some(existing) = next.mappings.values().find(|m| m.is_equivalent(&spec)) {
                return Err(AuthzError::InvalidSeed(format!(
                    "mapping duplicates seeded mapping {}",
                    existing.id
                )));
            }
            let id = inner.next_mapping_id;
            inner.next_mapping_id += 1;
            next.mappings.insert(id, spec.into_mapping(id, true));
        }

        inner.snapshot = Arc::new(next);
        Ok(())
    }
}

impl Default for MemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.inner.read().snapshot.clone()
    }

    fn list_roles(&self) -> Vec<Role> {
        self.snapshot().roles.values().cloned().collect()
    }

    fn get_role(&self, name: &str) -> Result<Role, AuthzError> {
        self.snapshot()
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| AuthzError::RoleNotFound { name: name.into() })
    }

    fn add_role(&self, role: Role) -> Result<(), AuthzError> {
        validate_role(&role)?;
        let mut inner = self.inner.write();
        if inner.snapshot.roles.contains_key(&role.name) {
            return Err(AuthzError::RoleAlreadyExists { name: role.name });
        }
        let mut next = PolicySnapshot::clone(&inner.snapshot);
        next.roles.insert(role.name.clone(), role);
        inner.snapshot = Arc::new(next);
        Ok(())
    }

    fn update_role(
        &self,
        name: &str,
        actions: BTreeSet<String>,
        description: Option<String>,
    ) -> Result<Role, AuthzError> {
        let mut inner = self.inner.write();
        let existing = inner
            .snapshot
            .roles
            .get(name)
            .ok_or_else(|| AuthzError::RoleNotFound { name: name.into() })?;

        let updated = Role {
            name: existing.name.clone(),
            actions,
            description: description.or_else(|| existing.description.clone()),
        };
        validate_role(&updated)?;

        let mut next = PolicySnapshot::clone(&inner.snapshot);
        next.roles.insert(updated.name.clone(), updated.clone());
        inner.snapshot = Arc::new(next);
        Ok(updated)
    }

    fn remove_role(&self, name: &str, force: bool) -> Result<(), AuthzError> {
        let mut inner = self.inner.write();
        if !inner.snapshot.roles.contains_key(name) {
            return Err(AuthzError::RoleNotFound { name: name.into() });
        }

        let referencing: Vec<&RoleEntitlementMapping> =
            inner.snapshot.mappings_referencing(name).collect();
        if !referencing.is_empty() {
            if !force {
                return Err(AuthzError::RoleInUse {
                    name: name.into(),
                    mappings: referencing.len(),
                });
            }
            // Forced cascade must not become a side door around
            // system-mapping immutability.
            if let Some(system) = referencing.iter().find(|m| m.system_managed) {
                return Err(AuthzError::SystemProtected { id: system.id });
            }
        }

        // Role and its mappings go in one swap.
        let mut next = PolicySnapshot::clone(&inner.snapshot);
        next.roles.remove(name);
        next.mappings.retain(|_, m| m.role_name != name);
        inner.snapshot = Arc::new(next);
        Ok(())
    }

    fn list_mappings(&self, filter: &MappingFilter) -> Vec<RoleEntitlementMapping> {
        self.snapshot()
            .mappings
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect()
    }

    fn add_mapping(&self, spec: MappingSpec) -> Result<RoleEntitlementMapping, AuthzError> {
        validate_spec(&spec)?;
        let mut inner = self.inner.write();
        if !inner.snapshot.roles.contains_key(&spec.role_name) {
            // No orphaned mappings: the role must exist first.
            return Err(AuthzError::RoleNotFound {
                name: spec.role_name,
            });
        }
        if let Some(existing) = inner
            .snapshot
            .mappings
            .values()
            .find(|m| m.is_equivalent(&spec))
        {
            return Err(AuthzError::MappingAlreadyExists { id: existing.id });
        }

        let id = inner.next_mapping_id;
        inner.next_mapping_id += 1;
        let mapping = spec.into_mapping(id, false);

        let mut next = PolicySnapshot::clone(&inner.snapshot);
        next.mappings.insert(id, mapping.clone());
        inner.snapshot = Arc::new(next);
        Ok(mapping)
    }

    fn update_mapping(
        &self,
        id: u64,
        spec: MappingSpec,
    ) -> Result<RoleEntitlementMapping, AuthzError> {
        validate_spec(&spec)?;
        let mut inner = self.inner.write();
        let existing = inner
            .snapshot
            .mappings
            .get(&id)
            .ok_or(AuthzError::MappingNotFound { id })?;
        if existing.system_managed {
            return Err(AuthzError::SystemProtected { id });
        }
        if !inner.snapshot.roles.contains_key(&spec.role_name) {
            return Err(AuthzError::RoleNotFound {
                name: spec.role_name,
            });
        }
        if let Some(dup) = inner
            .snapshot
            .mappings
            .values()
            .find(|m| m.id != id && m.is_equivalent(&spec))
        {
            return Err(AuthzError::MappingAlreadyExists { id: dup.id });
        }

        let mapping = spec.into_mapping(id, false);
        let mut next = PolicySnapshot::clone(&inner.snapshot);
        next.mappings.insert(id, mapping.clone());
        inner.snapshot = Arc::new(next);
        Ok(mapping)
    }

    fn remove_mapping(&self, id: u64) -> Result<(), AuthzError> {
        let mut inner = self.inner.write();
        let existing = inner
            .snapshot
            .mappings
            .get(&id)
            .ok_or(AuthzError::MappingNotFound { id })?;
        if existing.system_managed {
            return Err(AuthzError::SystemProtected { id });
        }

        let mut next = PolicySnapshot::clone(&inner.snapshot);
        next.mappings.remove(&id);
        inner.snapshot = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::{ContextMap, Effect, ResourceHierarchy};

    fn viewer_role() -> Role {
        Role {
            name: "viewer".into(),
            actions: ["project:view".to_string()].into(),
            description: None,
        }
    }

    fn viewer_spec(value: &str) -> MappingSpec {
        MappingSpec {
            role_name: "viewer".into(),
            entitlement: Entitlement {
                claim: "groups".into(),
                value: value.into(),
            },
            hierarchy: ResourceHierarchy::default(),
            effect: Effect::Allow,
            context: ContextMap::new(),
        }
    }

    #[test]
    fn test_add_and_get_role() {
        let store = MemoryPolicyStore::new();
        store.add_role(viewer_role()).unwrap();
        assert_eq!(store.get_role("viewer").unwrap().name, "viewer");
        assert!(matches!(
            store.get_role("missing"),
            Err(AuthzError::RoleNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_role_rejected() {
        let store = MemoryPolicyStore::new();
        store.add_role(viewer_role()).unwrap();
        assert!(matches!(
            store.add_role(viewer_role()),
            Err(AuthzError::RoleAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_orphan_mapping_rejected() {
        let store = MemoryPolicyStore::new();
        assert!(matches!(
            store.add_mapping(viewer_spec("devs")),
            Err(AuthzError::RoleNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_mapping_rejected() {
        let store = MemoryPolicyStore::new();
        store.add_role(viewer_role()).unwrap();
        let first = store.add_mapping(viewer_spec("devs")).unwrap();
        let err = store.add_mapping(viewer_spec("devs")).unwrap_err();
        match err {
            AuthzError::MappingAlreadyExists { id } => assert_eq!(id, first.id),
            other => panic!("expected MappingAlreadyExists, got {other:?}"),
        }
        // A different entitlement value is a different mapping.
        store.add_mapping(viewer_spec("ops")).unwrap();
    }

    #[test]
    fn test_remove_role_in_use() {
        let store = MemoryPolicyStore::new();
        store.add_role(viewer_role()).unwrap();
        store.add_mapping(viewer_spec("devs")).unwrap();
        store.add_mapping(viewer_spec("ops")).unwrap();

        match store.remove_role("viewer", false) {
            Err(AuthzError::RoleInUse { name, mappings }) => {
                assert_eq!(name, "viewer");
                assert_eq!(mappings, 2);
            }
            other => panic!("expected RoleInUse, got {other:?}"),
        }

        // Forced removal cascades role and mappings in one swap.
        store.remove_role("viewer", true).unwrap();
        assert!(store.get_role("viewer").is_err());
        assert!(store.list_mappings(&MappingFilter::default()).is_empty());
    }

    #[test]
    fn test_force_remove_blocked_by_system_mapping() {
        let store = MemoryPolicyStore::new();
        store
            .install_seed(vec![viewer_role()], vec![viewer_spec("platform")])
            .unwrap();
        assert!(matches!(
            store.remove_role("viewer", true),
            Err(AuthzError::SystemProtected { .. })
        ));
        // Role and mapping remain.
        assert!(store.get_role("viewer").is_ok());
        assert_eq!(store.list_mappings(&MappingFilter::default()).len(), 1);
    }

    #[test]
    fn test_system_mapping_immutable() {
        let store = MemoryPolicyStore::new();
        store
            .install_seed(vec![viewer_role()], vec![viewer_spec("platform")])
            .unwrap();
        let mappings = store.list_mappings(&MappingFilter::default());
        let seeded = &mappings[0];
        assert!(seeded.system_managed);

        assert!(matches!(
            store.update_mapping(seeded.id, viewer_spec("other")),
            Err(AuthzError::SystemProtected { .. })
        ));
        assert!(matches!(
            store.remove_mapping(seeded.id),
            Err(AuthzError::SystemProtected { .. })
        ));
    }

    #[test]
    fn test_update_mapping_replaces_fields() {
        let store = MemoryPolicyStore::new();
        store.add_role(viewer_role()).unwrap();
        let created = store.add_mapping(viewer_spec("devs")).unwrap();

        let mut spec = viewer_spec("devs");
        spec.effect = Effect::Deny;
        let updated = store.update_mapping(created.id, spec).unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.effect, Effect::Deny);
    }

    #[test]
    fn test_update_mapping_duplicate_detection_excludes_self() {
        let store = MemoryPolicyStore::new();
        store.add_role(viewer_role()).unwrap();
        let created = store.add_mapping(viewer_spec("devs")).unwrap();
        // Re-submitting identical fields against itself is a no-op update,
        // not a conflict.
        store.update_mapping(created.id, viewer_spec("devs")).unwrap();

        let other = store.add_mapping(viewer_spec("ops")).unwrap();
        assert!(matches!(
            store.update_mapping(other.id, viewer_spec("devs")),
            Err(AuthzError::MappingAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_mapping_filter() {
        let store = MemoryPolicyStore::new();
        store.add_role(viewer_role()).unwrap();
        store
            .add_role(Role {
                name: "admin".into(),
                actions: ["*".to_string()].into(),
                description: None,
            })
            .unwrap();
        store.add_mapping(viewer_spec("devs")).unwrap();
        let mut admin_spec = viewer_spec("ops");
        admin_spec.role_name = "admin".into();
        store.add_mapping(admin_spec).unwrap();

        let by_role = store.list_mappings(&MappingFilter {
            role_name: Some("viewer".into()),
            entitlement: None,
        });
        assert_eq!(by_role.len(), 1);

        let by_ent = store.list_mappings(&MappingFilter {
            role_name: None,
            entitlement: Some(Entitlement {
                claim: "groups".into(),
                value: "ops".into(),
            }),
        });
        assert_eq!(by_ent.len(), 1);
        assert_eq!(by_ent[0].role_name, "admin");
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = MemoryPolicyStore::new();
        store.add_role(viewer_role()).unwrap();
        let before = store.snapshot();

        store.add_mapping(viewer_spec("devs")).unwrap();
        // The pre-mutation snapshot is untouched.
        assert!(before.mappings.is_empty());
        assert_eq!(store.snapshot().mappings.len(), 1);
    }

    #[test]
    fn test_empty_actions_rejected() {
        let store = MemoryPolicyStore::new();
        assert!(matches!(
            store.add_role(Role {
                name: "empty".into(),
                actions: BTreeSet::new(),
                description: None,
            }),
            Err(AuthzError::InvalidRequest(_))
        ));
    }
}

//! The authorization policy decision point.
//!
//! [`AuthzService`] is the single service object wired into every handler at
//! startup. Enabled, it evaluates against the policy store and exposes the
//! administrative surface; disabled, evaluation short-circuits to Allow with
//! a distinct reason and policy management is unavailable.

pub mod actions;
pub mod engine;
pub mod errors;
pub mod hierarchy;
pub mod profile;
pub mod seed;
pub mod store;
pub mod subject;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::store::{MappingFilter, PolicyStore};
use crate::authz::types::{
    BatchItem, ContextMap, Decision, MappingSpec, ResourceHierarchy, Role, RoleEntitlementMapping,
    SubjectContext,
};

enum Mode {
    Enabled { store: Arc<dyn PolicyStore> },
    Disabled,
}

pub struct AuthzService {
    mode: Mode,
}

impl AuthzService {
    pub fn enabled(store: Arc<dyn PolicyStore>) -> Self {
        AuthzService {
            mode: Mode::Enabled { store },
        }
    }

    pub fn disabled() -> Self {
        AuthzService {
            mode: Mode::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, Mode::Enabled { .. })
    }

    fn store(&self) -> Result<&Arc<dyn PolicyStore>, AuthzError> {
        match &self.mode {
            Mode::Enabled { store } => Ok(store),
            Mode::Disabled => Err(AuthzError::Disabled),
        }
    }

    // ---------- decisions ----------

    pub fn evaluate(
        &self,
        subject: &SubjectContext,
        action: &str,
        resource: &ResourceHierarchy,
        context: &ContextMap,
    ) -> Result<Decision, AuthzError> {
        match &self.mode {
            Mode::Disabled => Ok(Decision::allow(engine::DISABLED_REASON)),
            Mode::Enabled { store } => {
                engine::validate_action(action)?;
                Ok(engine::evaluate(
                    &store.snapshot(),
                    subject,
                    action,
                    resource,
                    context,
                ))
            }
        }
    }

    pub fn batch_evaluate(
        &self,
        subject: &SubjectContext,
        items: &[BatchItem],
    ) -> Vec<Result<Decision, AuthzError>> {
        match &self.mode {
            Mode::Disabled => items
                .iter()
                .map(|_| Ok(Decision::allow(engine::DISABLED_REASON)))
                .collect(),
            Mode::Enabled { store } => engine::batch_evaluate(&store.snapshot(), subject, items),
        }
    }

    pub fn profile(
        &self,
        subject: &SubjectContext,
        scope: &ResourceHierarchy,
    ) -> Result<BTreeSet<String>, AuthzError> {
        match &self.mode {
            // Disabled evaluation allows everything, so the profile is the
            // whole catalog; anything else would break the
            // profile/evaluate equivalence.
            Mode::Disabled => Ok(actions::CATALOG.iter().map(|a| a.to_string()).collect()),
            Mode::Enabled { store } => Ok(profile::resolve(&store.snapshot(), subject, scope)),
        }
    }

    // ---------- administration ----------

    pub fn list_roles(&self) -> Result<Vec<Role>, AuthzError> {
        Ok(self.store()?.list_roles())
    }

    pub fn get_role(&self, name: &str) -> Result<Role, AuthzError> {
        self.store()?.get_role(name)
    }

    pub fn add_role(&self, role: Role) -> Result<(), AuthzError> {
        self.store()?.add_role(role)
    }

    pub fn update_role(
        &self,
        name: &str,
        actions: BTreeSet<String>,
        description: Option<String>,
    ) -> Result<Role, AuthzError> {
        self.store()?.update_role(name, actions, description)
    }

    pub fn remove_role(&self, name: &str, force: bool) -> Result<(), AuthzError> {
        self.store()?.remove_role(name, force)
    }

    pub fn list_mappings(
        &self,
        filter: &MappingFilter,
    ) -> Result<Vec<RoleEntitlementMapping>, AuthzError> {
        Ok(self.store()?.list_mappings(filter))
    }

    pub fn add_mapping(&self, spec: MappingSpec) -> Result<RoleEntitlementMapping, AuthzError> {
        self.store()?.add_mapping(spec)
    }

    pub fn update_mapping(
        &self,
        id: u64,
        spec: MappingSpec,
    ) -> Result<RoleEntitlementMapping, AuthzError> {
        self.store()?.update_mapping(id, spec)
    }

    pub fn remove_mapping(&self, id: u64) -> Result<(), AuthzError> {
        self.store()?.remove_mapping(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::store::MemoryPolicyStore;
    use crate::authz::types::{ClaimValue, Entitlement};
    use std::collections::BTreeMap;

    fn subject() -> SubjectContext {
        let mut claims = BTreeMap::new();
        claims.insert("groups".to_string(), ClaimValue::One("devs".into()));
        SubjectContext {
            subject_id: "alice".into(),
            user_type: "user".into(),
            claims,
        }
    }

    #[test]
    fn test_disabled_evaluation_allows_with_distinct_reason() {
        let svc = AuthzService::disabled();
        let d = svc
            .evaluate(
                &subject(),
                "project:view",
                &ResourceHierarchy::default(),
                &ContextMap::new(),
            )
            .unwrap();
        assert!(d.allowed);
        assert_eq!(d.reason, engine::DISABLED_REASON);
        assert_ne!(d.reason, engine::NO_MATCHING_POLICY);
    }

    #[test]
    fn test_disabled_administration_unavailable() {
        let svc = AuthzService::disabled();
        assert!(matches!(svc.list_roles(), Err(AuthzError::Disabled)));
        assert!(matches!(
            svc.remove_role("viewer", true),
            Err(AuthzError::Disabled)
        ));
        assert!(matches!(
            svc.list_mappings(&MappingFilter::default()),
            Err(AuthzError::Disabled)
        ));
    }

    #[test]
    fn test_disabled_profile_is_full_catalog() {
        let svc = AuthzService::disabled();
        let granted = svc
            .profile(&subject(), &ResourceHierarchy::default())
            .unwrap();
        assert_eq!(granted.len(), actions::CATALOG.len());
    }

    #[test]
    fn test_enabled_round_trip() {
        let store = Arc::new(MemoryPolicyStore::new());
        let svc = AuthzService::enabled(store);
        svc.add_role(Role {
            name: "viewer".into(),
            actions: ["project:view".to_string()].into(),
            description: None,
        })
        .unwrap();
        svc.add_mapping(MappingSpec {
            role_name: "viewer".into(),
            entitlement: Entitlement {
                claim: "groups".into(),
                value: "devs".into(),
            },
            hierarchy: ResourceHierarchy::default(),
            effect: crate::authz::types::Effect::Allow,
            context: ContextMap::new(),
        })
        .unwrap();

        let d = svc
            .evaluate(
                &subject(),
                "project:view",
                &ResourceHierarchy::default(),
                &ContextMap::new(),
            )
            .unwrap();
        assert!(d.allowed);

        // Forced role removal reverts dependent evaluations to default-deny.
        svc.remove_role("viewer", true).unwrap();
        let d = svc
            .evaluate(
                &subject(),
                "project:view",
                &ResourceHierarchy::default(),
                &ContextMap::new(),
            )
            .unwrap();
        assert!(!d.allowed);
        assert_eq!(d.reason, engine::NO_MATCHING_POLICY);
    }

    #[test]
    fn test_empty_action_rejected() {
        let store = Arc::new(MemoryPolicyStore::new());
        let svc = AuthzService::enabled(store);
        assert!(matches!(
            svc.evaluate(
                &subject(),
                "",
                &ResourceHierarchy::default(),
                &ContextMap::new()
            ),
            Err(AuthzError::InvalidRequest(_))
        ));
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Context constraints and request context: flat key/value pairs with
/// exact-match semantics. A key absent from a mapping's constraints is
/// unconstrained.
pub type ContextMap = BTreeMap<String, String>;

/// A resolved claim value. Multi-valued claims (group membership,
/// organization units) deserialize from JSON arrays; everything else is a
/// single string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    One(String),
    Many(BTreeSet<String>),
}

impl ClaimValue {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            ClaimValue::One(v) => v == value,
            ClaimValue::Many(vs) => vs.contains(value),
        }
    }

    /// All values, single or not.
    pub fn values(&self) -> Vec<&str> {
        match self {
            ClaimValue::One(v) => vec![v.as_str()],
            ClaimValue::Many(vs) => vs.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// Flattened claim name -> value map produced by the upstream subject
/// resolver. Consumed read-only by the decision engine.
pub type ClaimsMap = BTreeMap<String, ClaimValue>;

/// The authenticated subject an evaluation runs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectContext {
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub user_type: String,
    #[serde(default)]
    pub claims: ClaimsMap,
}

/// Effect of a mapping: grant or explicitly withhold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => write!(f, "allow"),
            Effect::Deny => write!(f, "deny"),
        }
    }
}

/// A claim-name/claim-value pair a subject must carry for a mapping to be a
/// candidate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entitlement {
    pub claim: String,
    pub value: String,
}

/// A location in the control-plane hierarchy.
///
/// On a mapping this is a scope pattern: an absent level is a wildcard, and
/// the OU set covers a request when any one of its members appears in the
/// request's OU set. On an evaluation request it is the concrete position of
/// the resource; an absent level there means the level does not apply to the
/// resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHierarchy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub organization_units: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

impl ResourceHierarchy {
    /// True when every level is a wildcard (mapping side) / unset (request
    /// side).
    pub fn is_global(&self) -> bool {
        self.organization.is_none()
            && self.organization_units.is_empty()
            && self.project.is_none()
            && self.component.is_none()
    }
}

/// Path rendering for reasons and logs: "org/acme/ou/payments/project/p1",
/// or "*" for the global scope.
impl fmt::Display for ResourceHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            return write!(f, "*");
        }
        let mut parts = Vec::new();
        if let Some(org) = &self.organization {
            parts.push(format!("org/{org}"));
        }
        for ou in &self.organization_units {
            parts.push(format!("ou/{ou}"));
        }
        if let Some(project) = &self.project {
            parts.push(format!("project/{project}"));
        }
        if let Some(component) = &self.component {
            parts.push(format!("component/{component}"));
        }
        write!(f, "{}", parts.join("/"))
    }
}

/// A named set of permitted actions. Entries are concrete
/// `resourceType:verb` identifiers or the wildcard forms `resourceType:*`
/// and `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub actions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Assignment of a role to an entitlement within a hierarchical scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntitlementMapping {
    /// Assigned by the store on creation.
    pub id: u64,
    pub role_name: String,
    pub entitlement: Entitlement,
    #[serde(default)]
    pub hierarchy: ResourceHierarchy,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: ContextMap,
    /// Seeded by the system; immutable through the administrative API.
    #[serde(default)]
    pub system_managed: bool,
}

impl RoleEntitlementMapping {
    /// Functional identity. Two mappings that agree on all of these fields
    /// are duplicates regardless of id or provenance.
    pub fn is_equivalent(&self, spec: &MappingSpec) -> bool {
        self.role_name == spec.role_name
            && self.entitlement == spec.entitlement
            && self.hierarchy == spec.hierarchy
            && self.effect == spec.effect
            && self.context == spec.context
    }
}

/// Caller-supplied mapping fields; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSpec {
    pub role_name: String,
    pub entitlement: Entitlement,
    #[serde(default)]
    pub hierarchy: ResourceHierarchy,
    pub effect: Effect,
    #[serde(default)]
    pub context: ContextMap,
}

impl MappingSpec {
    pub fn into_mapping(self, id: u64, system_managed: bool) -> RoleEntitlementMapping {
        RoleEntitlementMapping {
            id,
            role_name: self.role_name,
            entitlement: self.entitlement,
            hierarchy: self.hierarchy,
            effect: self.effect,
            context: self.context,
            system_managed,
        }
    }
}

/// The outcome of one evaluation. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Decision {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Decision {
            allowed: false,
            reason: reason.into(),
        }
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateRequest {
    pub subject: SubjectContext,
    pub action: String,
    #[serde(default)]
    pub resource: ResourceHierarchy,
    #[serde(default)]
    pub context: ContextMap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    pub action: String,
    #[serde(default)]
    pub resource: ResourceHierarchy,
    #[serde(default)]
    pub context: ContextMap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchEvaluateRequest {
    pub subject: SubjectContext,
    pub requests: Vec<BatchItem>,
}

/// Per-item batch outcome: a failed item carries its error without aborting
/// the rest of the batch.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Decision(Decision),
    Error { error: String },
}

#[derive(Debug, Serialize)]
pub struct BatchEvaluateResponse {
    pub decisions: Vec<BatchOutcome>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub subject_id: String,
    pub user_type: String,
    pub scope: ResourceHierarchy,
    /// Concrete actions the subject is granted at the scope, sorted.
    pub actions: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRoleRequest {
    pub actions: BTreeSet<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(org: Option<&str>, project: Option<&str>) -> ResourceHierarchy {
        ResourceHierarchy {
            organization: org.map(String::from),
            project: project.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_claim_value_contains() {
        let one = ClaimValue::One("acme".into());
        assert!(one.contains("acme"));
        assert!(!one.contains("other"));

        let many = ClaimValue::Many(["a".to_string(), "b".to_string()].into());
        assert!(many.contains("a"));
        assert!(many.contains("b"));
        assert!(!many.contains("c"));
    }

    #[test]
    fn test_claim_value_untagged_serde() {
        let one: ClaimValue = serde_json::from_str(r#""acme""#).unwrap();
        assert_eq!(one, ClaimValue::One("acme".into()));

        let many: ClaimValue = serde_json::from_str(r#"["x", "y"]"#).unwrap();
        assert!(many.contains("x"));
        assert!(many.contains("y"));
    }

    #[test]
    fn test_hierarchy_display() {
        assert_eq!(ResourceHierarchy::default().to_string(), "*");
        assert_eq!(
            scope(Some("acme"), Some("billing")).to_string(),
            "org/acme/project/billing"
        );

        let with_ou = ResourceHierarchy {
            organization: Some("acme".into()),
            organization_units: ["payments".to_string()].into(),
            ..Default::default()
        };
        assert_eq!(with_ou.to_string(), "org/acme/ou/payments");
    }

    #[test]
    fn test_mapping_equivalence_ignores_id_and_provenance() {
        let spec = MappingSpec {
            role_name: "viewer".into(),
            entitlement: Entitlement {
                claim: "groups".into(),
                value: "devs".into(),
            },
            hierarchy: scope(Some("acme"), None),
            effect: Effect::Allow,
            context: ContextMap::new(),
        };
        let a = spec.clone().into_mapping(1, false);
        let b = spec.clone().into_mapping(7, true);
        assert!(a.is_equivalent(&spec));
        assert!(b.is_equivalent(&spec));

        let mut other = spec;
        other.effect = Effect::Deny;
        assert!(!a.is_equivalent(&other));
    }

    #[test]
    fn test_hierarchy_deserializes_with_defaults() {
        let h: ResourceHierarchy = serde_json::from_str(r#"{"organization":"acme"}"#).unwrap();
        assert_eq!(h.organization.as_deref(), Some("acme"));
        assert!(h.organization_units.is_empty());
        assert!(h.project.is_none());
    }
}

//! Seeded system policy.
//!
//! Seed files are KDL documents declaring roles and mappings that ship with
//! the deployment. Everything installed from a seed file is system-managed:
//! visible through the API, immutable through it. Example:
//!
//! ```kdl
//! role "platform-admin" description="Full control-plane access" {
//!     actions {
//!         - "*"
//!     }
//! }
//!
//! mapping role="platform-admin" claim="groups" value="platform-admins" effect="allow"
//!
//! mapping role="project-viewer" claim="groups" value="acme-devs" effect="allow" {
//!     scope org="acme" project="billing" {
//!         ou "payments"
//!     }
//!     context {
//!         environment "production"
//!     }
//! }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use kdl::KdlDocument;

use crate::authz::errors::AuthzError;
use crate::authz::types::{ContextMap, Effect, Entitlement, MappingSpec, ResourceHierarchy, Role};

/// Parsed content of one or more seed files.
#[derive(Debug, Clone, Default)]
pub struct SeedPolicy {
    pub roles: Vec<Role>,
    pub mappings: Vec<MappingSpec>,
}

/// Load all `.kdl` seed files from the given directory, sorted by path, and
/// merge them into one seed policy.
pub fn load_seeds(dir: &Path) -> Result<SeedPolicy, AuthzError> {
    if !dir.is_dir() {
        return Err(AuthzError::InvalidSeed(format!(
            "seed directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut merged = SeedPolicy::default();
    let mut file_count = 0;

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| AuthzError::SeedLoadError {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = parse_seed_document(&contents)?;
        merged.roles.extend(parsed.roles);
        merged.mappings.extend(parsed.mappings);
        file_count += 1;
    }

    tracing::info!(
        files = file_count,
        roles = merged.roles.len(),
        mappings = merged.mappings.len(),
        "Loaded policy seeds"
    );

    Ok(merged)
}

/// Parse a KDL seed document string into roles and mapping specs.
pub fn parse_seed_document(source: &str) -> Result<SeedPolicy, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut seed = SeedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "role" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidSeed(
                        "role node requires a string argument (e.g. role \"viewer\")".into(),
                    )
                })?;
                let description = node
                    .get("description")
                    .and_then(|v| v.value().as_string())
                    .map(|s| s.to_string());

                let mut actions: BTreeSet<String> = BTreeSet::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "actions" => {
                                actions = dash_list(child).into_iter().collect();
                            }
                            other => {
                                return Err(AuthzError::InvalidSeed(format!(
                                    "unexpected child `{other}` in role `{name}` (expected `actions`)"
                                )));
                            }
                        }
                    }
                }
                if actions.is_empty() {
                    return Err(AuthzError::InvalidSeed(format!(
                        "role `{name}` must declare at least one action"
                    )));
                }

                seed.roles.push(Role {
                    name,
                    actions,
                    description,
                });
            }
            "mapping" => {
                seed.mappings.push(parse_mapping_node(node)?);
            }
            other => {
                // Ignore unknown top-level nodes with a warning.
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(seed)
}

fn parse_mapping_node(node: &kdl::KdlNode) -> Result<MappingSpec, AuthzError> {
    let role_name = string_prop(node, "role").ok_or_else(|| {
        AuthzError::InvalidSeed("mapping missing `role` property (e.g. role=\"viewer\")".into())
    })?;
    let claim = string_prop(node, "claim").ok_or_else(|| {
        AuthzError::InvalidSeed(format!(
            "mapping for role `{role_name}` missing `claim` property"
        ))
    })?;
    let value = string_prop(node, "value").ok_or_else(|| {
        AuthzError::InvalidSeed(format!(
            "mapping for role `{role_name}` missing `value` property"
        ))
    })?;
    let effect = match string_prop(node, "effect").as_deref() {
        Some("allow") | None => Effect::Allow,
        Some("deny") => Effect::Deny,
        Some(other) => {
            return Err(AuthzError::InvalidSeed(format!(
                "mapping for role `{role_name}` has invalid effect `{other}` (expected \"allow\" or \"deny\")"
            )));
        }
    };

    let mut hierarchy = ResourceHierarchy::default();
    let mut context = ContextMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "scope" => {
                    hierarchy.organization = string_prop(child, "org");
                    hierarchy.project = string_prop(child, "project");
                    hierarchy.component = string_prop(child, "component");
                    if let Some(grandchildren) = child.children() {
                        for ou_node in grandchildren.nodes() {
                            if ou_node.name().value() != "ou" {
                                return Err(AuthzError::InvalidSeed(format!(
                                    "unexpected child `{}` in scope (expected `ou`)",
                                    ou_node.name().value()
                                )));
                            }
                            let ou = first_string_arg(ou_node).ok_or_else(|| {
                                AuthzError::InvalidSeed(
                                    "ou node requires a string argument".into(),
                                )
                            })?;
                            hierarchy.organization_units.insert(ou);
                        }
                    }
                }
                "context" => {
                    if let Some(grandchildren) = child.children() {
                        for kv in grandchildren.nodes() {
                            let key = kv.name().value().to_string();
                            let val = first_string_arg(kv).ok_or_else(|| {
                                AuthzError::InvalidSeed(format!(
                                    "context key `{key}` requires a string value"
                                ))
                            })?;
                            context.insert(key, val);
                        }
                    }
                }
                other => {
                    return Err(AuthzError::InvalidSeed(format!(
                        "unexpected child `{other}` in mapping for role `{role_name}` (expected `scope` or `context`)"
                    )));
                }
            }
        }
    }

    Ok(MappingSpec {
        role_name,
        entitlement: Entitlement { claim, value },
        hierarchy,
        effect,
        context,
    })
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &kdl::KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a
/// string.
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}

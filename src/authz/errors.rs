use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("role `{name}` not found")]
    #[diagnostic(code(palisade::authz::role_not_found))]
    RoleNotFound { name: String },

    #[error("role mapping {id} not found")]
    #[diagnostic(code(palisade::authz::mapping_not_found))]
    MappingNotFound { id: u64 },

    #[error("role `{name}` already exists")]
    #[diagnostic(code(palisade::authz::role_exists))]
    RoleAlreadyExists { name: String },

    #[error("an equivalent role mapping already exists (id {id})")]
    #[diagnostic(code(palisade::authz::mapping_exists))]
    MappingAlreadyExists { id: u64 },

    #[error("role `{name}` is referenced by {mappings} mapping(s)")]
    #[diagnostic(
        code(palisade::authz::role_in_use),
        help("retry with ?force=true to remove the role together with its mappings")
    )]
    RoleInUse { name: String, mappings: usize },

    #[error("role mapping {id} is system-managed and cannot be modified or removed")]
    #[diagnostic(code(palisade::authz::system_protected))]
    SystemProtected { id: u64 },

    #[error("invalid request: {0}")]
    #[diagnostic(code(palisade::authz::invalid_request))]
    InvalidRequest(String),

    #[error("authorization is disabled - policy management operations are not available")]
    #[diagnostic(
        code(palisade::authz::disabled),
        help("enable the policy engine with authz.enabled = true")
    )]
    Disabled,

    #[error("policy store failure: {0}")]
    #[diagnostic(code(palisade::authz::internal))]
    Internal(String),

    // Seed loading failures surface at startup, never over HTTP.
    #[error("failed to load seed file `{path}`")]
    #[diagnostic(
        code(palisade::authz::seed_load),
        help("check that the file exists and contains valid KDL syntax")
    )]
    SeedLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid seed policy: {0}")]
    #[diagnostic(
        code(palisade::authz::invalid_seed),
        help("each seed file must contain valid `role` and `mapping` KDL nodes")
    )]
    InvalidSeed(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(code(palisade::authz::kdl_parse))]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(palisade::authz::io))]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Stable machine-readable discriminant carried on error responses.
    pub fn code(&self) -> &'static str {
        match self {
            AuthzError::RoleNotFound { .. } | AuthzError::MappingNotFound { .. } => "not_found",
            AuthzError::RoleAlreadyExists { .. } | AuthzError::MappingAlreadyExists { .. } => {
                "already_exists"
            }
            AuthzError::RoleInUse { .. } => "in_use",
            AuthzError::SystemProtected { .. } => "system_protected",
            AuthzError::InvalidRequest(_) => "invalid_request",
            AuthzError::Disabled => "disabled",
            _ => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuthzError::RoleNotFound { .. } | AuthzError::MappingNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            AuthzError::RoleAlreadyExists { .. }
            | AuthzError::MappingAlreadyExists { .. }
            | AuthzError::RoleInUse { .. } => StatusCode::CONFLICT,
            AuthzError::SystemProtected { .. } | AuthzError::Disabled => StatusCode::FORBIDDEN,
            AuthzError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.to_string(), "code": self.code() });
        (self.status(), Json(body)).into_response()
    }
}

//! HTTP surface of the policy decision service.
//!
//! Handlers translate between the wire DTOs and the [`AuthzService`] entry
//! points and map domain errors to status codes through the error enum's
//! `IntoResponse`. The administrative routes are self-protecting: each one
//! first evaluates the caller's own subject against the corresponding
//! `role:*` / `rolemapping:*` action.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use miette::IntoDiagnostic;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::authz::errors::AuthzError;
use crate::authz::store::MappingFilter;
use crate::authz::types::{
    BatchEvaluateRequest, BatchEvaluateResponse, BatchOutcome, ContextMap, Entitlement,
    EvaluateRequest, MappingSpec, ProfileResponse, ResourceHierarchy, Role, SubjectContext,
    UpdateRoleRequest,
};
use crate::authz::{actions, subject, AuthzService};
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub authz: Arc<AuthzService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/authz/roles", get(list_roles).post(add_role))
        .route(
            "/authz/roles/{role_name}",
            get(get_role).put(update_role).delete(remove_role),
        )
        .route(
            "/authz/role-mappings",
            get(list_mappings).post(add_mapping),
        )
        .route(
            "/authz/role-mappings/{mapping_id}",
            put(update_mapping).delete(remove_mapping),
        )
        .route("/authz/actions", get(list_actions))
        .route("/authz/user-types", get(list_user_types))
        .route("/authz/evaluate", post(evaluate))
        .route("/authz/batch-evaluate", post(batch_evaluate))
        .route("/authz/profile", get(profile))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: Settings, authz: Arc<AuthzService>) -> miette::Result<()> {
    let state = AppState {
        settings: Arc::new(settings),
        authz,
    };
    let addr: SocketAddr = state
        .settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let router = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    tracing::info!(%addr, "Authorization policy API listening");
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

// ---------- caller subject resolution ----------

fn bearer_token<'a>(headers: &'a HeaderMap) -> Result<&'a str, AuthzError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AuthzError::InvalidRequest("missing bearer token".into()))
}

fn caller_subject(state: &AppState, headers: &HeaderMap) -> Result<SubjectContext, AuthzError> {
    let token = bearer_token(headers)?;
    subject::subject_from_bearer(token, &state.settings.user_types)
}

/// Gate an administrative route: the caller's own subject must be allowed
/// the given policy-management action. Disabled engine means administration
/// is unavailable outright.
fn authorize_admin(state: &AppState, headers: &HeaderMap, action: &str) -> Result<(), Response> {
    if !state.authz.is_enabled() {
        return Err(AuthzError::Disabled.into_response());
    }
    let caller = caller_subject(state, headers).map_err(IntoResponse::into_response)?;
    let decision = state
        .authz
        .evaluate(
            &caller,
            action,
            &ResourceHierarchy::default(),
            &ContextMap::new(),
        )
        .map_err(IntoResponse::into_response)?;
    if !decision.allowed {
        tracing::debug!(
            subject = %caller.subject_id,
            action,
            reason = %decision.reason,
            "administrative request denied"
        );
        let body = json!({
            "error": format!("forbidden: {}", decision.reason),
            "code": "forbidden",
        });
        return Err((StatusCode::FORBIDDEN, Json(body)).into_response());
    }
    Ok(())
}

// ---------- roles ----------

async fn list_roles(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers, "role:view") {
        return resp;
    }
    match state.authz.list_roles() {
        Ok(roles) => Json(roles).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(role_name): Path<String>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers, "role:view") {
        return resp;
    }
    match state.authz.get_role(&role_name) {
        Ok(role) => Json(role).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn add_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(role): Json<Role>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers, "role:create") {
        return resp;
    }
    match state.authz.add_role(role.clone()) {
        Ok(()) => (StatusCode::CREATED, Json(role)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(role_name): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers, "role:update") {
        return resp;
    }
    match state
        .authz
        .update_role(&role_name, req.actions, req.description)
    {
        Ok(role) => Json(role).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RemoveRoleParams {
    #[serde(default)]
    force: bool,
}

async fn remove_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(role_name): Path<String>,
    Query(params): Query<RemoveRoleParams>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers, "role:delete") {
        return resp;
    }
    match state.authz.remove_role(&role_name, params.force) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

// ---------- mappings ----------

#[derive(Debug, Deserialize)]
struct MappingListParams {
    role: Option<String>,
    claim: Option<String>,
    value: Option<String>,
}

async fn list_mappings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<MappingListParams>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers, "rolemapping:view") {
        return resp;
    }
    let entitlement = match (params.claim, params.value) {
        (Some(claim), Some(value)) => Some(Entitlement { claim, value }),
        (None, None) => None,
        // A claim without its value (or vice versa) filters nothing useful.
        _ => {
            return AuthzError::InvalidRequest(
                "claim and value filters must be supplied together".into(),
            )
            .into_response();
        }
    };
    let filter = MappingFilter {
        role_name: params.role,
        entitlement,
    };
    match state.authz.list_mappings(&filter) {
        Ok(mappings) => Json(mappings).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn add_mapping(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(spec): Json<MappingSpec>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers, "rolemapping:create") {
        return resp;
    }
    match state.authz.add_mapping(spec) {
        Ok(mapping) => (StatusCode::CREATED, Json(mapping)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_mapping(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(mapping_id): Path<u64>,
    Json(spec): Json<MappingSpec>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers, "rolemapping:update") {
        return resp;
    }
    match state.authz.update_mapping(mapping_id, spec) {
        Ok(mapping) => Json(mapping).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn remove_mapping(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(mapping_id): Path<u64>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers, "rolemapping:delete") {
        return resp;
    }
    match state.authz.remove_mapping(mapping_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

// ---------- introspection ----------

async fn list_actions() -> Response {
    Json(actions::CATALOG).into_response()
}

async fn list_user_types(State(state): State<AppState>) -> Response {
    Json(&state.settings.user_types).into_response()
}

// ---------- decisions ----------

async fn evaluate(State(state): State<AppState>, Json(req): Json<EvaluateRequest>) -> Response {
    match state
        .authz
        .evaluate(&req.subject, &req.action, &req.resource, &req.context)
    {
        Ok(decision) => Json(decision).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn batch_evaluate(
    State(state): State<AppState>,
    Json(req): Json<BatchEvaluateRequest>,
) -> Response {
    let outcomes = state.authz.batch_evaluate(&req.subject, &req.requests);
    let decisions = outcomes
        .into_iter()
        .map(|outcome| match outcome {
            Ok(decision) => BatchOutcome::Decision(decision),
            Err(e) => BatchOutcome::Error {
                error: e.to_string(),
            },
        })
        .collect();
    Json(BatchEvaluateResponse { decisions }).into_response()
}

/// Parse `?org=&project=&component=&ou=` with `ou` repeatable.
fn parse_profile_query(query: &str) -> Result<ResourceHierarchy, AuthzError> {
    let mut scope = ResourceHierarchy::default();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(raw)
            .map_err(|_| {
                AuthzError::InvalidRequest(format!("query parameter `{key}` is not valid UTF-8"))
            })?
            .into_owned();
        if value.is_empty() {
            continue;
        }
        match key {
            "org" => scope.organization = Some(value),
            "project" => scope.project = Some(value),
            "component" => scope.component = Some(value),
            "ou" => {
                scope.organization_units.insert(value);
            }
            _ => {}
        }
    }
    if scope.organization.is_none() {
        return Err(AuthzError::InvalidRequest(
            "organization (org) query parameter is required".into(),
        ));
    }
    Ok(scope)
}

async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let caller = match caller_subject(&state, &headers) {
        Ok(subject) => subject,
        Err(e) => return e.into_response(),
    };
    let scope = match parse_profile_query(query.as_deref().unwrap_or("")) {
        Ok(scope) => scope,
        Err(e) => return e.into_response(),
    };
    match state.authz.profile(&caller, &scope) {
        Ok(granted) => Json(ProfileResponse {
            subject_id: caller.subject_id,
            user_type: caller.user_type,
            scope,
            actions: granted.into_iter().collect(),
            evaluated_at: Utc::now(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

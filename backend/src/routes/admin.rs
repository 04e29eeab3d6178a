//! Instructor-only grant management. The perimeter gate lets these routes
//! through without a cookie check; authorization happens here, in full, on
//! every request.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::gate::ClientAddr;
use crate::models::grant::PermissionGrant;
use crate::routes::{error_json, session_error_response};
use crate::AppState;

/// Middleware requiring a verified session whose roles include an
/// instructor-class role.
async fn require_instructor(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let client = request
        .extensions()
        .get::<ClientAddr>()
        .map(|c| c.0.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let (claims, user) = match state.sessions.resolve(&jar, &state.store) {
        Ok(resolved) => resolved,
        Err(e) => return session_error_response(e, &path, &client),
    };

    if !auth::is_instructor(&user.roles) {
        tracing::warn!(
            target: "security",
            client = %client,
            user = %claims.username,
            path = %path,
            "Non-instructor attempted admin access"
        );
        return error_json(StatusCode::FORBIDDEN, "Instructor role required");
    }

    next.run(request).await
}

#[derive(Debug, Serialize)]
pub struct GrantListResponse {
    pub grants: Vec<PermissionGrant>,
    pub total: usize,
}

/// GET /api/admin/grants - all grants, active and inactive.
async fn list_grants(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_grants() {
        Ok(grants) => Json(GrantListResponse {
            total: grants.len(),
            grants,
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Failed to list grants: {}", e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateGrantRequest {
    pub course_id: String,
    pub chatflow_id: String,
    pub allowed_roles: Vec<String>,
}

/// POST /api/admin/grants - create a grant, or update the roles of an
/// existing (course, chatflow) grant.
async fn create_grant(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateGrantRequest>,
) -> Response {
    if request.course_id.is_empty()
        || request.chatflow_id.is_empty()
        || request.allowed_roles.is_empty()
    {
        return error_json(
            StatusCode::BAD_REQUEST,
            "course_id, chatflow_id, and allowed_roles are required",
        );
    }

    match state.store.upsert_grant(
        &request.course_id,
        &request.chatflow_id,
        &request.allowed_roles,
    ) {
        Ok(grant) => {
            tracing::info!(
                "Grant stored: course {} chatflow {} ({} roles)",
                grant.course_id,
                grant.chatflow_id,
                grant.allowed_roles.len()
            );
            (StatusCode::CREATED, Json(grant)).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to store grant: {}", e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// DELETE /api/admin/grants/:id - deactivate a grant. The row is kept so the
/// grant history survives.
async fn revoke_grant(State(state): State<Arc<AppState>>, Path(grant_id): Path<String>) -> Response {
    match state.store.set_grant_active(&grant_id, false) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_json(StatusCode::NOT_FOUND, "Grant not found"),
        Err(e) => {
            tracing::error!("Failed to revoke grant {}: {}", grant_id, e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/grants", get(list_grants).post(create_grant))
        .route("/grants/:id", delete(revoke_grant))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_instructor,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_grant_request_deserialize() {
        let req: CreateGrantRequest = serde_json::from_str(
            r#"{"course_id":"course-42","chatflow_id":"wf-9","allowed_roles":["Learner"]}"#,
        )
        .unwrap();
        assert_eq!(req.course_id, "course-42");
        assert_eq!(req.chatflow_id, "wf-9");
        assert_eq!(req.allowed_roles, vec!["Learner".to_string()]);
    }
}

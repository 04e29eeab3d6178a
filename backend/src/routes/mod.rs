pub mod admin;
pub mod chatflows;
pub mod health;
pub mod lti;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;

use crate::auth::SessionError;
use crate::{gate, logging, AppState};

/// Assemble the full application router: routes, request logger, and the
/// perimeter gate wrapped around everything.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .nest("/api/lti", lti::router(state.clone()))
        .nest("/api/chatflows", chatflows::router(state.clone()))
        .nest("/api/admin", admin::router(state.clone()))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(middleware::from_fn_with_state(state, gate::request_gate))
}

/// Map a session failure to a response. Authentication failures tell the
/// user what to do, not what went wrong internally.
pub(crate) fn session_error_response(err: SessionError, path: &str, client: &str) -> Response {
    match err {
        SessionError::Internal(detail) => {
            tracing::error!("Session check failed on {}: {}", path, detail);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
        other => {
            tracing::warn!(
                target: "security",
                client = %client,
                path = %path,
                reason = %other,
                "Unauthenticated request"
            );
            error_json(
                StatusCode::UNAUTHORIZED,
                "Not authenticated. Return to your course in the learning platform and relaunch the tool.",
            )
        }
    }
}

pub(crate) fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

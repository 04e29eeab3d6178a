//! Chatflow catalog and prediction proxy. Every handler resolves the
//! session credential and consults the permission resolver before talking
//! to Flowise.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::flowise::{ChatflowDescriptor, FlowiseError};
use crate::gate::ClientAddr;
use crate::routes::{error_json, session_error_response};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ChatflowListResponse {
    pub chatflows: Vec<ChatflowDescriptor>,
}

/// GET /api/chatflows - the chatflows the caller's course and roles grant.
async fn list_chatflows(
    State(state): State<Arc<AppState>>,
    Extension(ClientAddr(client)): Extension<ClientAddr>,
    jar: CookieJar,
) -> Response {
    let (claims, user) = match state.sessions.resolve(&jar, &state.store) {
        Ok(resolved) => resolved,
        Err(e) => return session_error_response(e, "/api/chatflows", &client),
    };

    let allowed = match state
        .permissions
        .list_accessible_chatflows(&claims.context_id, &user.roles)
    {
        Ok(allowed) => allowed,
        Err(e) => {
            tracing::error!("Grant lookup failed: {}", e);
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };

    // No grants means no upstream call at all.
    if allowed.is_empty() {
        return Json(ChatflowListResponse { chatflows: vec![] }).into_response();
    }

    match state.flowise.list_chatflows().await {
        Ok(all) => {
            let chatflows = all
                .into_iter()
                .filter(|flow| allowed.contains(&flow.id))
                .collect();
            Json(ChatflowListResponse { chatflows }).into_response()
        }
        Err(e) => flowise_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_message_id: Option<String>,
}

/// POST /api/chatflows/:id/predict - forward a question to the chatflow.
async fn predict(
    State(state): State<Arc<AppState>>,
    Extension(ClientAddr(client)): Extension<ClientAddr>,
    jar: CookieJar,
    Path(chatflow_id): Path<String>,
    Json(request): Json<PredictRequest>,
) -> Response {
    let (claims, user) = match state.sessions.resolve(&jar, &state.store) {
        Ok(resolved) => resolved,
        Err(e) => return session_error_response(e, "/api/chatflows/predict", &client),
    };

    match state
        .permissions
        .can_access(&claims.context_id, &user.roles, &chatflow_id)
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                target: "security",
                client = %client,
                user = %user.username,
                course = %claims.context_id,
                chatflow = %chatflow_id,
                "Chatflow access denied"
            );
            return error_json(
                StatusCode::FORBIDDEN,
                "You do not have access to this chatflow",
            );
        }
        Err(e) => {
            tracing::error!("Grant lookup failed: {}", e);
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    }

    // The per-launch session id scopes Flowise conversation memory to this
    // user and launch.
    match state
        .flowise
        .predict(&chatflow_id, &request.question, Some(&claims.session_id))
        .await
    {
        Ok(answer) => Json(PredictResponse {
            text: answer.text,
            chat_message_id: answer.chat_message_id,
        })
        .into_response(),
        Err(e) => flowise_error_response(e),
    }
}

/// Upstream failures are logged in full and reported to the caller without
/// upstream detail.
fn flowise_error_response(err: FlowiseError) -> Response {
    tracing::error!("Flowise request failed: {}", err);
    let status = match err {
        FlowiseError::Upstream { status, .. } if status == 404 => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    };
    error_json(status, "The chat service is unavailable")
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(list_chatflows))
        .route("/:id/predict", post(predict))
        .with_state(state)
}

//! LTI 1.3 endpoints: login initiation, launch callback, tool key set, and
//! session introspection/logout.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::auth::{self, AuthError};
use crate::AppState;

/// Parameters of the OIDC third-party login initiation.
#[derive(Debug, Deserialize)]
pub struct LoginParams {
    pub iss: String,
    pub login_hint: String,
    #[allow(dead_code)]
    pub target_link_uri: String,
    /// Required; kept optional in the wire format so absence reaches the
    /// handler and gets the failure page instead of an extractor rejection.
    pub client_id: Option<String>,
    pub lti_message_hint: Option<String>,
}

/// Form posted back by the platform after authorization.
#[derive(Debug, Deserialize)]
pub struct CallbackForm {
    pub id_token: String,
    pub state: String,
}

/// GET /api/lti/login - platform-initiated login (query parameters)
async fn login_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LoginParams>,
) -> Response {
    begin_login(&state, params)
}

/// POST /api/lti/login - platform-initiated login (form post)
async fn login_post(
    State(state): State<Arc<AppState>>,
    Form(params): Form<LoginParams>,
) -> Response {
    begin_login(&state, params)
}

/// Validate the initiation parameters and redirect to the platform's
/// authorization endpoint with fresh state and nonce.
fn begin_login(state: &AppState, params: LoginParams) -> Response {
    if params.iss != state.config.lti.issuer {
        tracing::warn!("Login initiation from unknown issuer: {}", params.iss);
        return error_page("The login request came from an unknown platform.");
    }

    match params.client_id.as_deref() {
        Some(client_id) if client_id == state.config.lti.client_id => {}
        Some(client_id) => {
            tracing::warn!("Login initiation with wrong client_id: {}", client_id);
            return error_page("The login request used an unknown client id.");
        }
        None => {
            tracing::warn!("Login initiation without client_id");
            return error_page("The login request is missing its client id.");
        }
    }

    let (login_state, nonce) = state.login_cache.begin();

    let mut url = match url::Url::parse(&state.config.lti.auth_login_url) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!("Invalid auth_login_url in configuration: {}", e);
            return error_page("The tool is misconfigured. Contact your administrator.");
        }
    };
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("scope", "openid")
            .append_pair("response_type", "id_token")
            .append_pair("response_mode", "form_post")
            .append_pair("prompt", "none")
            .append_pair("client_id", &state.config.lti.client_id)
            .append_pair("redirect_uri", &state.config.lti.redirect_url)
            .append_pair("login_hint", &params.login_hint)
            .append_pair("state", &login_state)
            .append_pair("nonce", &nonce);
        if let Some(ref hint) = params.lti_message_hint {
            query.append_pair("lti_message_hint", hint);
        }
    }

    Redirect::to(url.as_str()).into_response()
}

/// POST /api/lti/callback - completes the launch: validates the id_token,
/// upserts the user, sets the session cookie, and redirects into the app.
async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<CallbackForm>,
) -> Response {
    match complete_login(&state, &form).await {
        Ok(cookie_token) => {
            let cookie = state.sessions.cookie(cookie_token);
            (jar.add(cookie), Redirect::to("/")).into_response()
        }
        Err(e) => {
            tracing::warn!(target: "security", error = %e, "LTI launch rejected");
            error_page(
                "Your login could not be verified. \
                 Return to your course in the learning platform and launch the tool again.",
            )
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum LaunchError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("store write failed: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("session issue failed: {0}")]
    Session(#[from] crate::auth::SessionError),
}

async fn complete_login(state: &AppState, form: &CallbackForm) -> Result<String, LaunchError> {
    let nonce = state
        .login_cache
        .take(&form.state)
        .ok_or(AuthError::InvalidState)?;

    let claims = state.validator.decode_and_validate(&form.id_token).await?;
    if claims.nonce != nonce {
        return Err(AuthError::NonceMismatch.into());
    }

    let info = auth::extract(&claims);
    let session_id = uuid::Uuid::new_v4().to_string();
    let user = state.store.upsert_user(&info, &session_id)?;

    tracing::info!(
        "LTI launch for {} in context {} ({} roles)",
        user.username,
        user.context_id,
        user.roles.len()
    );

    Ok(state.sessions.issue(&user)?)
}

/// GET /api/lti/jwks - the tool's public key set, cacheable for an hour.
async fn jwks(State(state): State<Arc<AppState>>) -> Response {
    let body = state
        .config
        .lti
        .tool_jwks
        .as_deref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .unwrap_or_else(|| serde_json::json!({ "keys": [] }));

    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(body),
    )
        .into_response()
}

/// User subset exposed by session introspection.
#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub id: String,
    pub name: Option<String>,
    pub username: String,
    pub email: Option<String>,
    pub context_id: String,
    pub roles: Vec<String>,
    /// Advisory UI classification, not an authorization decision.
    pub instructor: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
}

/// GET /api/lti/session - report whether the caller holds a valid session.
async fn session_info(State(state): State<Arc<AppState>>, jar: CookieJar) -> Json<SessionResponse> {
    match state.sessions.resolve(&jar, &state.store) {
        Ok((claims, _user)) => Json(SessionResponse {
            authenticated: true,
            user: Some(SessionUser {
                id: claims.uid,
                name: claims.name,
                username: claims.username,
                email: claims.email,
                context_id: claims.context_id,
                instructor: auth::is_instructor(&claims.roles),
                roles: claims.roles,
            }),
        }),
        Err(_) => Json(SessionResponse {
            authenticated: false,
            user: None,
        }),
    }
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// POST /api/lti/session - logout: clear the cookie.
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let jar = jar.add(state.sessions.clear_cookie());
    (jar, Json(LogoutResponse { success: true })).into_response()
}

/// Render a human-readable login failure page. Login always terminates in
/// navigation, so failures are HTML, not JSON.
fn error_page(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Html(format!(
            "<!DOCTYPE html><html><head><title>Login failed</title></head>\
             <body><h1>Login failed</h1><p>{}</p></body></html>",
            message
        )),
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", get(login_get).post(login_post))
        .route("/callback", post(callback))
        .route("/jwks", get(jwks))
        .route("/session", get(session_info).post(logout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_response_omits_user_when_absent() {
        let json = serde_json::to_string(&SessionResponse {
            authenticated: false,
            user: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"authenticated":false}"#);
    }

    #[test]
    fn test_session_response_includes_user() {
        let json = serde_json::to_string(&SessionResponse {
            authenticated: true,
            user: Some(SessionUser {
                id: "u-1".to_string(),
                name: None,
                username: "ada".to_string(),
                email: None,
                context_id: "course-42".to_string(),
                roles: vec![],
                instructor: false,
            }),
        })
        .unwrap();
        assert!(json.contains(r#""authenticated":true"#));
        assert!(json.contains(r#""username":"ada""#));
        assert!(json.contains(r#""context_id":"course-42""#));
    }

    #[test]
    fn test_callback_form_deserialize() {
        let form: CallbackForm =
            serde_urlencoded::from_str("id_token=abc&state=xyz").unwrap();
        assert_eq!(form.id_token, "abc");
        assert_eq!(form.state, "xyz");
    }
}

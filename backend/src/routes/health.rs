use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let users = match state.store.count_users() {
        Ok(count) => count,
        Err(e) => {
            tracing::error!("Failed to count users for metrics: {}", e);
            0
        }
    };
    let version = env!("CARGO_PKG_VERSION");
    let body = format!(
        "# HELP ltigateway_up Whether the service is up\n\
         # TYPE ltigateway_up gauge\n\
         ltigateway_up 1\n\
         # HELP ltigateway_info Service information\n\
         # TYPE ltigateway_info gauge\n\
         ltigateway_info{{version=\"{}\"}} 1\n\
         # HELP ltigateway_users Users stored from platform launches\n\
         # TYPE ltigateway_users gauge\n\
         ltigateway_users {}\n",
        version, users
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

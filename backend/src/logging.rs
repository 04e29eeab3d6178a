use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::gate::ClientAddr;

/// Middleware that logs HTTP requests at INFO level, tagged with the client
/// address the gate resolved for the request.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = request
        .extensions()
        .get::<ClientAddr>()
        .map(|c| c.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        path = %path,
        client = %client,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "HTTP request"
    );

    response
}

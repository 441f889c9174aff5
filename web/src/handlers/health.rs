//! Liveness endpoint.

use axum::http::StatusCode;

/// Simple health check (for liveness).
///
/// ```text
/// GET /health
/// ```
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

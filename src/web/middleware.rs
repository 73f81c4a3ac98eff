//! HTTP middleware
//!
//! Request logging and security headers, applied to every route.

use axum::{
    extract::Request,
    http::{HeaderValue, Method, Uri, header},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn};

/// Request logging middleware
///
/// Logs method, path, status and duration under a per-request id. Query
/// strings are left out so relay payloads and signatures stay out of logs.
pub async fn request_logging_middleware(
    method: Method,
    uri: Uri,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let path = uri.path().to_string();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration = start.elapsed();

    if status >= 400 {
        warn!(
            method = %method,
            path = %path,
            status = status,
            request_id = %request_id,
            duration_ms = duration.as_millis() as u64,
            "HTTP request completed with error"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status,
            request_id = %request_id,
            duration_ms = duration.as_millis() as u64,
            "HTTP request completed"
        );
    }

    response
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));

    response
}

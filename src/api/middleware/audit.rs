//! Access logging middleware.
//!
//! Logs every API request with tenant, method, path, status and latency.
//! Runs innermost, after the tenant middleware has injected `TenantContext`.

use std::time::Instant;

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::TenantContext;

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let tenant_id = req
        .extensions()
        .get::<TenantContext>()
        .map(|t| t.tenant_id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if response.status().is_server_error() {
        tracing::warn!(%tenant_id, %method, %path, status, elapsed_ms, "API access");
    } else {
        tracing::info!(%tenant_id, %method, %path, status, elapsed_ms, "API access");
    }

    response
}

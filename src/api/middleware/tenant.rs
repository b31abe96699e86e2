//! Tenant context middleware.
//!
//! Reads `X-Tenant-Id`, checks the tenant exists, and injects
//! `TenantContext` into request extensions for downstream handlers.
//! Missing, malformed or unknown tenants are rejected with 401.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, TenantContext};
use crate::service::ServiceError;

pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Require a known tenant on every scoped request.
pub async fn require_tenant(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_tenant_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_tenant_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let tenant_id = req
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(ApiError::Unauthorized)?;

    let tenant = match ctx.service.get_tenant(&tenant_id) {
        Ok(tenant) => tenant,
        Err(ServiceError::NotFound { .. }) => {
            tracing::warn!(tenant_id = %tenant_id, "Request for unknown tenant rejected");
            return Err(ApiError::Unauthorized);
        }
        Err(e) => return Err(e.into()),
    };

    req.extensions_mut().insert(TenantContext {
        tenant_id: tenant.id,
    });

    Ok(next.run(req).await)
}

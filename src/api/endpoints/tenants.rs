//! Tenant registration and directory.
//!
//! `POST /api/tenants` is the only write that runs without a tenant header:
//! it is how a tenant comes into existence. `GET /api/tenants` lists them
//! by name.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::Tenant;
use crate::service::NewTenant;

/// `GET /api/tenants`
pub async fn list(State(ctx): State<ApiContext>) -> Result<Json<Vec<Tenant>>, ApiError> {
    Ok(Json(ctx.service.list_tenants()?))
}

/// `POST /api/tenants`
pub async fn create(
    State(ctx): State<ApiContext>,
    Json(req): Json<NewTenant>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    let tenant = ctx.service.create_tenant(req)?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

//! Protocol endpoints.
//!
//! - `GET /api/protocols`
//! - `POST /api/protocols`: protocol plus its task definitions, one write
//! - `GET /api/protocols/:id`

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, TenantContext};
use crate::models::Protocol;
use crate::service::NewProtocol;

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
) -> Result<Json<Vec<Protocol>>, ApiError> {
    Ok(Json(ctx.service.list_protocols(&tenant.tenant_id)?))
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Json(req): Json<NewProtocol>,
) -> Result<(StatusCode, Json<Protocol>), ApiError> {
    let protocol = ctx.service.create_protocol(&tenant.tenant_id, req)?;
    Ok((StatusCode::CREATED, Json(protocol)))
}

pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Protocol>, ApiError> {
    Ok(Json(ctx.service.get_protocol(&tenant.tenant_id, &id)?))
}

//! Provider endpoints: `GET|POST /api/providers`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, TenantContext};
use crate::models::Provider;
use crate::service::NewProvider;

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
) -> Result<Json<Vec<Provider>>, ApiError> {
    Ok(Json(ctx.service.list_providers(&tenant.tenant_id)?))
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Json(req): Json<NewProvider>,
) -> Result<(StatusCode, Json<Provider>), ApiError> {
    let provider = ctx.service.create_provider(&tenant.tenant_id, req)?;
    Ok((StatusCode::CREATED, Json(provider)))
}

//! `POST /api/tasks/:id/status`: move a task instance forward.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, TenantContext};
use crate::models::enums::TaskStatus;
use crate::models::PatientTaskInstance;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn update_status(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(task_id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> Result<Json<PatientTaskInstance>, ApiError> {
    let task = ctx
        .service
        .update_task_status(&tenant.tenant_id, &task_id, req.status, req.notes)?;
    Ok(Json(task))
}

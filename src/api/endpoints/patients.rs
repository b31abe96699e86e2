//! Patient endpoints.
//!
//! - `GET /api/patients`
//! - `POST /api/patients`
//! - `POST /api/patients/:id/assignments`: apply a protocol
//! - `GET /api/patients/:id/tasks?from=&to=`: scheduled tasks

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, TenantContext};
use crate::models::{Patient, TaskView};
use crate::service::{AssignProtocol, AssignmentOutcome, NewPatient};

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    Ok(Json(ctx.service.list_patients(&tenant.tenant_id)?))
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Json(req): Json<NewPatient>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let patient = ctx.service.create_patient(&tenant.tenant_id, req)?;
    Ok((StatusCode::CREATED, Json(patient)))
}

/// `POST /api/patients/:id/assignments`: 409 if already assigned.
pub async fn assign(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<AssignProtocol>,
) -> Result<(StatusCode, Json<AssignmentOutcome>), ApiError> {
    let outcome = ctx
        .service
        .assign_protocol(&tenant.tenant_id, &patient_id, req)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct TaskRangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub async fn tasks(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(patient_id): Path<Uuid>,
    Query(range): Query<TaskRangeQuery>,
) -> Result<Json<Vec<TaskView>>, ApiError> {
    let tasks =
        ctx.service
            .list_patient_tasks(&tenant.tenant_id, &patient_id, range.from, range.to)?;
    Ok(Json(tasks))
}

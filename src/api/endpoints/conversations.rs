//! Conversation and message endpoints.
//!
//! Every write here publishes a change event; connected subscribers of the
//! same tenant see it on `/ws/subscribe`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, TenantContext};
use crate::models::enums::ConversationStatus;
use crate::models::{ChatMessage, Conversation};
use crate::service::{NewConversation, NewMessage};

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(ctx.service.list_conversations(&tenant.tenant_id)?))
}

pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Json(req): Json<NewConversation>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conversation = ctx.service.start_conversation(&tenant.tenant_id, req)?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

#[derive(Debug, Deserialize)]
pub struct ConversationStatusUpdate {
    pub status: ConversationStatus,
}

pub async fn update_status(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<ConversationStatusUpdate>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = ctx
        .service
        .set_conversation_status(&tenant.tenant_id, &id, req.status)?;
    Ok(Json(conversation))
}

pub async fn messages(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    Ok(Json(ctx.service.list_messages(&tenant.tenant_id, &id)?))
}

pub async fn send(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewMessage>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let message = ctx.service.send_message(&tenant.tenant_id, &id, req)?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct EditMessage {
    pub editor_id: Uuid,
    pub body: String,
}

pub async fn edit(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessage>,
) -> Result<Json<ChatMessage>, ApiError> {
    let message =
        ctx.service
            .edit_message(&tenant.tenant_id, &message_id, &req.editor_id, req.body)?;
    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub struct ReadReceipt {
    pub reader_id: Uuid,
}

pub async fn read(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<ReadReceipt>,
) -> Result<Json<ChatMessage>, ApiError> {
    let message = ctx
        .service
        .mark_message_read(&tenant.tenant_id, &message_id, &req.reader_id)?;
    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub struct TypingUpdate {
    pub user_id: Uuid,
    #[serde(default = "default_typing")]
    pub is_typing: bool,
}

fn default_typing() -> bool {
    true
}

/// `POST /api/conversations/:id/typing`: 204; indicators expire on their own.
pub async fn typing(
    State(ctx): State<ApiContext>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<TypingUpdate>,
) -> Result<StatusCode, ApiError> {
    ctx.service
        .set_typing(&tenant.tenant_id, &id, &req.user_id, req.is_typing)?;
    Ok(StatusCode::NO_CONTENT)
}

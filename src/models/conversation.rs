use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ConversationStatus, ParticipantRole};

/// Care-team conversation about one patient, scoped to a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub patient_id: Uuid,
    pub subject: Option<String>,
    pub status: ConversationStatus,
    pub participants: Vec<Participant>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: NaiveDateTime,
}

/// Immutable once delivered, except the edit flag/body and read receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: ParticipantRole,
    pub body: String,
    pub sent_at: NaiveDateTime,
    pub edited: bool,
    pub read_by: Vec<Uuid>,
}

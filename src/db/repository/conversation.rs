use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{format_timestamp, parse_timestamp, parse_uuid, DatabaseError};
use crate::models::enums::{ConversationStatus, ParticipantRole};
use crate::models::*;

/// Insert a conversation together with its participant list.
pub fn insert_conversation(conn: &Connection, conv: &Conversation) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO conversations (id, tenant_id, patient_id, subject, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            conv.id.to_string(),
            conv.tenant_id.to_string(),
            conv.patient_id.to_string(),
            conv.subject,
            conv.status.as_str(),
            format_timestamp(&conv.created_at),
            format_timestamp(&conv.updated_at),
        ],
    )?;
    for participant in &conv.participants {
        tx.execute(
            "INSERT OR IGNORE INTO conversation_participants
             (conversation_id, participant_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                conv.id.to_string(),
                participant.participant_id.to_string(),
                participant.role.as_str(),
                format_timestamp(&participant.joined_at),
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn get_conversation(conn: &Connection, id: &Uuid) -> Result<Option<Conversation>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, tenant_id, patient_id, subject, status, created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![id.to_string()],
            read_conversation_row,
        )
        .optional()?;

    match row {
        Some(row) => {
            let mut conv = conversation_from_row(row)?;
            conv.participants = list_participants(conn, &conv.id)?;
            Ok(Some(conv))
        }
        None => Ok(None),
    }
}

/// Owning tenant of a conversation. Used by the realtime event filter.
pub fn get_conversation_tenant(
    conn: &Connection,
    conversation_id: &Uuid,
) -> Result<Option<Uuid>, DatabaseError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT tenant_id FROM conversations WHERE id = ?1",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    raw.as_deref().map(parse_uuid).transpose()
}

/// Conversations of a tenant, most recently active first.
pub fn list_conversations_by_tenant(
    conn: &Connection,
    tenant_id: &Uuid,
) -> Result<Vec<Conversation>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, patient_id, subject, status, created_at, updated_at
         FROM conversations WHERE tenant_id = ?1 ORDER BY updated_at DESC",
    )?;
    let rows = stmt.query_map(params![tenant_id.to_string()], read_conversation_row)?;

    let mut conversations = Vec::new();
    for row in rows {
        let mut conv = conversation_from_row(row?)?;
        conv.participants = list_participants(conn, &conv.id)?;
        conversations.push(conv);
    }
    Ok(conversations)
}

pub fn update_conversation_status(
    conn: &Connection,
    id: &Uuid,
    status: ConversationStatus,
    updated_at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE conversations SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), status.as_str(), format_timestamp(updated_at)],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Conversation", id));
    }
    Ok(())
}

fn list_participants(
    conn: &Connection,
    conversation_id: &Uuid,
) -> Result<Vec<Participant>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT participant_id, role, joined_at FROM conversation_participants
         WHERE conversation_id = ?1 ORDER BY joined_at ASC, participant_id ASC",
    )?;
    let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut participants = Vec::new();
    for row in rows {
        let (id, role, joined_at) = row?;
        participants.push(Participant {
            participant_id: parse_uuid(&id)?,
            role: ParticipantRole::from_str(&role)?,
            joined_at: parse_timestamp(&joined_at)?,
        });
    }
    Ok(participants)
}

// ═══════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════

/// Insert a message and bump the conversation's `updated_at`.
pub fn insert_message(conn: &Connection, msg: &ChatMessage) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, sender_role, body, sent_at, edited)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            msg.id.to_string(),
            msg.conversation_id.to_string(),
            msg.sender_id.to_string(),
            msg.sender_role.as_str(),
            msg.body,
            format_timestamp(&msg.sent_at),
            msg.edited as i32,
        ],
    )?;
    tx.execute(
        "UPDATE conversations SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
        params![msg.conversation_id.to_string(), format_timestamp(&msg.sent_at)],
    )?;
    tx.commit()?;
    Ok(())
}

pub fn get_message(conn: &Connection, id: &Uuid) -> Result<Option<ChatMessage>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, conversation_id, sender_id, sender_role, body, sent_at, edited
             FROM messages WHERE id = ?1",
            params![id.to_string()],
            read_message_row,
        )
        .optional()?;

    match row {
        Some(row) => {
            let mut msg = message_from_row(row)?;
            msg.read_by = list_readers(conn, &msg.id)?;
            Ok(Some(msg))
        }
        None => Ok(None),
    }
}

/// Messages of a conversation in delivery order.
pub fn get_messages_by_conversation(
    conn: &Connection,
    conversation_id: &Uuid,
) -> Result<Vec<ChatMessage>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, sender_role, body, sent_at, edited
         FROM messages WHERE conversation_id = ?1 ORDER BY sent_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![conversation_id.to_string()], read_message_row)?;

    let mut messages = Vec::new();
    for row in rows {
        let mut msg = message_from_row(row?)?;
        msg.read_by = list_readers(conn, &msg.id)?;
        messages.push(msg);
    }
    Ok(messages)
}

/// Replace a message body and flag it as edited.
pub fn update_message_body(conn: &Connection, id: &Uuid, body: &str) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE messages SET body = ?2, edited = 1 WHERE id = ?1",
        params![id.to_string(), body],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Message", id));
    }
    Ok(())
}

/// Record a read receipt. Returns `false` if the reader had already read it.
pub fn insert_message_read(
    conn: &Connection,
    message_id: &Uuid,
    reader_id: &Uuid,
    read_at: &NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO message_reads (message_id, reader_id, read_at) VALUES (?1, ?2, ?3)",
        params![message_id.to_string(), reader_id.to_string(), format_timestamp(read_at)],
    )?;
    Ok(changed == 1)
}

fn list_readers(conn: &Connection, message_id: &Uuid) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT reader_id FROM message_reads WHERE message_id = ?1 ORDER BY read_at ASC",
    )?;
    let rows = stmt.query_map(params![message_id.to_string()], |row| row.get::<_, String>(0))?;

    let mut readers = Vec::new();
    for row in rows {
        readers.push(parse_uuid(&row?)?);
    }
    Ok(readers)
}

struct ConversationRow {
    id: String,
    tenant_id: String,
    patient_id: String,
    subject: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

struct MessageRow {
    id: String,
    conversation_id: String,
    sender_id: String,
    sender_role: String,
    body: String,
    sent_at: String,
    edited: i32,
}

fn read_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        patient_id: row.get(2)?,
        subject: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn read_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_role: row.get(3)?,
        body: row.get(4)?,
        sent_at: row.get(5)?,
        edited: row.get(6)?,
    })
}

fn conversation_from_row(row: ConversationRow) -> Result<Conversation, DatabaseError> {
    Ok(Conversation {
        id: parse_uuid(&row.id)?,
        tenant_id: parse_uuid(&row.tenant_id)?,
        patient_id: parse_uuid(&row.patient_id)?,
        subject: row.subject,
        status: ConversationStatus::from_str(&row.status)?,
        participants: Vec::new(),
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

fn message_from_row(row: MessageRow) -> Result<ChatMessage, DatabaseError> {
    Ok(ChatMessage {
        id: parse_uuid(&row.id)?,
        conversation_id: parse_uuid(&row.conversation_id)?,
        sender_id: parse_uuid(&row.sender_id)?,
        sender_role: ParticipantRole::from_str(&row.sender_role)?,
        body: row.body,
        sent_at: parse_timestamp(&row.sent_at)?,
        edited: row.edited != 0,
        read_by: Vec::new(),
    })
}

use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{
    format_date, format_timestamp, parse_date, parse_timestamp, parse_uuid, DatabaseError,
};
use crate::models::enums::TaskType;
use crate::models::*;
use crate::scheduling::{Recurrence, RecurrenceRule};

/// Insert a protocol and its task definitions atomically.
pub fn insert_protocol(conn: &Connection, protocol: &Protocol) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO protocols (id, tenant_id, name, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            protocol.id.to_string(),
            protocol.tenant_id.to_string(),
            protocol.name,
            protocol.description,
            format_timestamp(&protocol.created_at),
        ],
    )?;

    for (position, def) in protocol.tasks.iter().enumerate() {
        if def.protocol_id != protocol.id {
            return Err(DatabaseError::ConstraintViolation(format!(
                "task definition {} belongs to protocol {}, not {}",
                def.id, def.protocol_id, protocol.id
            )));
        }
        insert_task_definition(&tx, &TaskDefinitionRecord::from(def), position)?;
    }

    tx.commit()?;
    Ok(())
}

/// Insert one definition row as-is. Authoring goes through `insert_protocol`;
/// this is also how imported templates with legacy descriptors land.
pub fn insert_task_definition(
    conn: &Connection,
    def: &TaskDefinitionRecord,
    position: usize,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO protocol_task_definitions
         (id, protocol_id, position, title, task_type, day_offset, recurrence, recurrence_end_day)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            def.id.to_string(),
            def.protocol_id.to_string(),
            position as i64,
            def.title,
            def.task_type.as_str(),
            def.day_offset,
            def.recurrence,
            def.recurrence_end_day,
        ],
    )?;
    Ok(())
}

/// Load a protocol with typed definitions.
///
/// A stored recurrence descriptor outside the current vocabulary reads back
/// as a single occurrence, with the raw text kept in
/// `unrecognized_recurrence`.
pub fn get_protocol(conn: &Connection, id: &Uuid) -> Result<Option<Protocol>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, tenant_id, name, description, created_at FROM protocols WHERE id = ?1",
            params![id.to_string()],
            read_protocol_row,
        )
        .optional()?;

    let row = match row {
        Some(row) => row,
        None => return Ok(None),
    };

    let mut protocol = protocol_from_row(row)?;
    protocol.tasks = list_definition_records(conn, &protocol.id)?
        .into_iter()
        .map(definition_from_record)
        .collect();
    Ok(Some(protocol))
}

/// Owning tenant of a protocol, without loading its definitions.
pub fn get_protocol_tenant(conn: &Connection, id: &Uuid) -> Result<Option<Uuid>, DatabaseError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT tenant_id FROM protocols WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    raw.as_deref().map(parse_uuid).transpose()
}

/// Protocol headers for a tenant (definitions not loaded).
pub fn list_protocols_by_tenant(
    conn: &Connection,
    tenant_id: &Uuid,
) -> Result<Vec<Protocol>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, name, description, created_at
         FROM protocols WHERE tenant_id = ?1 ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![tenant_id.to_string()], read_protocol_row)?;

    let mut protocols = Vec::new();
    for row in rows {
        protocols.push(protocol_from_row(row?)?);
    }
    Ok(protocols)
}

/// Definition rows in authoring order, recurrence left as stored.
pub fn list_definition_records(
    conn: &Connection,
    protocol_id: &Uuid,
) -> Result<Vec<TaskDefinitionRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, protocol_id, title, task_type, day_offset, recurrence, recurrence_end_day
         FROM protocol_task_definitions WHERE protocol_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(params![protocol_id.to_string()], |row| {
        Ok(DefinitionRow {
            id: row.get(0)?,
            protocol_id: row.get(1)?,
            title: row.get(2)?,
            task_type: row.get(3)?,
            day_offset: row.get(4)?,
            recurrence: row.get(5)?,
            recurrence_end_day: row.get(6)?,
        })
    })?;

    let mut records = Vec::new();
    for row in rows {
        let row = row?;
        records.push(TaskDefinitionRecord {
            id: parse_uuid(&row.id)?,
            protocol_id: parse_uuid(&row.protocol_id)?,
            title: row.title,
            task_type: TaskType::from_str(&row.task_type)?,
            day_offset: row.day_offset,
            recurrence: row.recurrence,
            recurrence_end_day: row.recurrence_end_day,
        });
    }
    Ok(records)
}

pub fn insert_assignment(
    conn: &Connection,
    assignment: &ProtocolAssignment,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO protocol_assignments
         (id, tenant_id, patient_id, protocol_id, anchor_date, assigned_by, assigned_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            assignment.id.to_string(),
            assignment.tenant_id.to_string(),
            assignment.patient_id.to_string(),
            assignment.protocol_id.to_string(),
            format_date(&assignment.anchor_date),
            assignment.assigned_by.map(|id| id.to_string()),
            format_timestamp(&assignment.assigned_at),
        ],
    )?;
    Ok(())
}

/// Existing assignment of `protocol_id` to `patient_id`, if any.
pub fn find_assignment(
    conn: &Connection,
    patient_id: &Uuid,
    protocol_id: &Uuid,
) -> Result<Option<ProtocolAssignment>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, tenant_id, patient_id, protocol_id, anchor_date, assigned_by, assigned_at
             FROM protocol_assignments WHERE patient_id = ?1 AND protocol_id = ?2",
            params![patient_id.to_string(), protocol_id.to_string()],
            |row| {
                Ok(AssignmentRow {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    patient_id: row.get(2)?,
                    protocol_id: row.get(3)?,
                    anchor_date: row.get(4)?,
                    assigned_by: row.get(5)?,
                    assigned_at: row.get(6)?,
                })
            },
        )
        .optional()?;

    row.map(assignment_from_row).transpose()
}

struct ProtocolRow {
    id: String,
    tenant_id: String,
    name: String,
    description: Option<String>,
    created_at: String,
}

struct DefinitionRow {
    id: String,
    protocol_id: String,
    title: String,
    task_type: String,
    day_offset: i32,
    recurrence: String,
    recurrence_end_day: Option<i32>,
}

struct AssignmentRow {
    id: String,
    tenant_id: String,
    patient_id: String,
    protocol_id: String,
    anchor_date: String,
    assigned_by: Option<String>,
    assigned_at: String,
}

fn read_protocol_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProtocolRow> {
    Ok(ProtocolRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn protocol_from_row(row: ProtocolRow) -> Result<Protocol, DatabaseError> {
    Ok(Protocol {
        id: parse_uuid(&row.id)?,
        tenant_id: parse_uuid(&row.tenant_id)?,
        name: row.name,
        description: row.description,
        created_at: parse_timestamp(&row.created_at)?,
        tasks: Vec::new(),
    })
}

fn definition_from_record(record: TaskDefinitionRecord) -> ProtocolTaskDefinition {
    let (pattern, unrecognized_recurrence) = match Recurrence::from_str(&record.recurrence) {
        Ok(pattern) => (pattern, None),
        Err(e) => {
            tracing::warn!(
                definition_id = %record.id,
                descriptor = %record.recurrence,
                error = %e,
                "Stored recurrence unrecognized, reading as single occurrence"
            );
            (Recurrence::None, Some(record.recurrence))
        }
    };
    ProtocolTaskDefinition {
        id: record.id,
        protocol_id: record.protocol_id,
        title: record.title,
        task_type: record.task_type,
        day_offset: record.day_offset,
        recurrence: RecurrenceRule {
            pattern,
            end_day_offset: record.recurrence_end_day,
        },
        unrecognized_recurrence,
    }
}

fn assignment_from_row(row: AssignmentRow) -> Result<ProtocolAssignment, DatabaseError> {
    Ok(ProtocolAssignment {
        id: parse_uuid(&row.id)?,
        tenant_id: parse_uuid(&row.tenant_id)?,
        patient_id: parse_uuid(&row.patient_id)?,
        protocol_id: parse_uuid(&row.protocol_id)?,
        anchor_date: parse_date(&row.anchor_date)?,
        assigned_by: row.assigned_by.as_deref().map(parse_uuid).transpose()?,
        assigned_at: parse_timestamp(&row.assigned_at)?,
    })
}

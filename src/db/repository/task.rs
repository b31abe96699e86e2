use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{
    format_date, format_timestamp, parse_date, parse_timestamp, parse_uuid, DatabaseError,
};
use crate::models::enums::{TaskStatus, TaskType};
use crate::models::*;

/// Insert a task instance unless one already exists for the same
/// (patient, definition, date). Returns `true` when a row was written.
pub fn insert_task_instance(
    conn: &Connection,
    task: &PatientTaskInstance,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO patient_tasks
         (id, patient_id, assignment_id, task_definition_id, scheduled_date, status,
          completed_at, completion_notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            task.id.to_string(),
            task.patient_id.to_string(),
            task.assignment_id.to_string(),
            task.task_definition_id.to_string(),
            format_date(&task.scheduled_date),
            task.status.as_str(),
            task.completion.as_ref().map(|c| format_timestamp(&c.completed_at)),
            task.completion.as_ref().and_then(|c| c.notes.clone()),
            format_timestamp(&task.created_at),
        ],
    )?;
    Ok(changed == 1)
}

pub fn get_task_instance(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<PatientTaskInstance>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, patient_id, assignment_id, task_definition_id, scheduled_date, status,
                    completed_at, completion_notes, created_at
             FROM patient_tasks WHERE id = ?1",
            params![id.to_string()],
            read_task_row,
        )
        .optional()?;

    row.map(task_from_row).transpose()
}

/// Tasks for one patient joined with their definitions, by date.
/// `from` / `to` are inclusive bounds when given.
pub fn list_tasks_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<TaskView>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.patient_id, t.assignment_id, t.task_definition_id, t.scheduled_date,
                t.status, t.completed_at, t.completion_notes, t.created_at,
                d.title, d.task_type
         FROM patient_tasks t
         JOIN protocol_task_definitions d ON d.id = t.task_definition_id
         WHERE t.patient_id = ?1
           AND (?2 IS NULL OR t.scheduled_date >= ?2)
           AND (?3 IS NULL OR t.scheduled_date <= ?3)
         ORDER BY t.scheduled_date ASC, d.position ASC",
    )?;

    let rows = stmt.query_map(
        params![
            patient_id.to_string(),
            from.as_ref().map(format_date),
            to.as_ref().map(format_date),
        ],
        |row| Ok((read_task_row(row)?, row.get::<_, String>(9)?, row.get::<_, String>(10)?)),
    )?;

    let mut tasks = Vec::new();
    for row in rows {
        let (task_row, title, task_type) = row?;
        tasks.push(TaskView {
            instance: task_from_row(task_row)?,
            title,
            task_type: TaskType::from_str(&task_type)?,
        });
    }
    Ok(tasks)
}

/// Persist a status change. Transition rules are enforced by the caller.
pub fn update_task_status(
    conn: &Connection,
    id: &Uuid,
    status: TaskStatus,
    completion: Option<&TaskCompletion>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE patient_tasks SET status = ?2, completed_at = ?3, completion_notes = ?4
         WHERE id = ?1",
        params![
            id.to_string(),
            status.as_str(),
            completion.map(|c| format_timestamp(&c.completed_at)),
            completion.and_then(|c| c.notes.clone()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("PatientTask", id));
    }
    Ok(())
}

pub fn count_tasks_for_assignment(
    conn: &Connection,
    assignment_id: &Uuid,
) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM patient_tasks WHERE assignment_id = ?1",
        params![assignment_id.to_string()],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count as u32)
}

struct TaskRow {
    id: String,
    patient_id: String,
    assignment_id: String,
    task_definition_id: String,
    scheduled_date: String,
    status: String,
    completed_at: Option<String>,
    completion_notes: Option<String>,
    created_at: String,
}

fn read_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        assignment_id: row.get(2)?,
        task_definition_id: row.get(3)?,
        scheduled_date: row.get(4)?,
        status: row.get(5)?,
        completed_at: row.get(6)?,
        completion_notes: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn task_from_row(row: TaskRow) -> Result<PatientTaskInstance, DatabaseError> {
    let completion = match row.completed_at {
        Some(at) => Some(TaskCompletion {
            completed_at: parse_timestamp(&at)?,
            notes: row.completion_notes,
        }),
        None => None,
    };
    Ok(PatientTaskInstance {
        id: parse_uuid(&row.id)?,
        patient_id: parse_uuid(&row.patient_id)?,
        assignment_id: parse_uuid(&row.assignment_id)?,
        task_definition_id: parse_uuid(&row.task_definition_id)?,
        scheduled_date: parse_date(&row.scheduled_date)?,
        status: TaskStatus::from_str(&row.status)?,
        completion,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

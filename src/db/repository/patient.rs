use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{format_date, format_timestamp, parse_date, parse_timestamp, parse_uuid, DatabaseError};
use crate::models::*;

pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, tenant_id, full_name, surgery_date, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            patient.id.to_string(),
            patient.tenant_id.to_string(),
            patient.full_name,
            patient.surgery_date.as_ref().map(format_date),
            format_timestamp(&patient.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, tenant_id, full_name, surgery_date, created_at
             FROM patients WHERE id = ?1",
            params![id.to_string()],
            read_patient_row,
        )
        .optional()?;

    row.map(patient_from_row).transpose()
}

/// Patients of one tenant, alphabetical.
pub fn list_patients_by_tenant(
    conn: &Connection,
    tenant_id: &Uuid,
) -> Result<Vec<Patient>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, full_name, surgery_date, created_at
         FROM patients WHERE tenant_id = ?1 ORDER BY full_name ASC",
    )?;
    let rows = stmt.query_map(params![tenant_id.to_string()], read_patient_row)?;

    let mut patients = Vec::new();
    for row in rows {
        patients.push(patient_from_row(row?)?);
    }
    Ok(patients)
}

struct PatientRow {
    id: String,
    tenant_id: String,
    full_name: String,
    surgery_date: Option<String>,
    created_at: String,
}

fn read_patient_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatientRow> {
    Ok(PatientRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        full_name: row.get(2)?,
        surgery_date: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn patient_from_row(row: PatientRow) -> Result<Patient, DatabaseError> {
    Ok(Patient {
        id: parse_uuid(&row.id)?,
        tenant_id: parse_uuid(&row.tenant_id)?,
        full_name: row.full_name,
        surgery_date: row.surgery_date.as_deref().map(parse_date).transpose()?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

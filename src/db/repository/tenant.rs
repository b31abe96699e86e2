use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{format_timestamp, parse_timestamp, parse_uuid, DatabaseError};
use crate::models::enums::TenantKind;
use crate::models::*;

pub fn insert_tenant(conn: &Connection, tenant: &Tenant) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO tenants (id, name, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            tenant.id.to_string(),
            tenant.name,
            tenant.kind.as_str(),
            format_timestamp(&tenant.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_tenant(conn: &Connection, id: &Uuid) -> Result<Option<Tenant>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, name, kind, created_at FROM tenants WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok(TenantRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    kind: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;

    row.map(tenant_from_row).transpose()
}

pub fn list_tenants(conn: &Connection) -> Result<Vec<Tenant>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT id, name, kind, created_at FROM tenants ORDER BY name ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok(TenantRow {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;

    let mut tenants = Vec::new();
    for row in rows {
        tenants.push(tenant_from_row(row?)?);
    }
    Ok(tenants)
}

struct TenantRow {
    id: String,
    name: String,
    kind: String,
    created_at: String,
}

fn tenant_from_row(row: TenantRow) -> Result<Tenant, DatabaseError> {
    Ok(Tenant {
        id: parse_uuid(&row.id)?,
        name: row.name,
        kind: TenantKind::from_str(&row.kind)?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

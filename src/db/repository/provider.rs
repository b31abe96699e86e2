use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{format_timestamp, parse_timestamp, parse_uuid, DatabaseError};
use crate::models::enums::ProviderRole;
use crate::models::*;

pub fn insert_provider(conn: &Connection, provider: &Provider) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO providers (id, tenant_id, full_name, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            provider.id.to_string(),
            provider.tenant_id.to_string(),
            provider.full_name,
            provider.role.as_str(),
            format_timestamp(&provider.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_provider(conn: &Connection, id: &Uuid) -> Result<Option<Provider>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, tenant_id, full_name, role, created_at FROM providers WHERE id = ?1",
            params![id.to_string()],
            read_provider_row,
        )
        .optional()?;

    row.map(provider_from_row).transpose()
}

pub fn list_providers_by_tenant(
    conn: &Connection,
    tenant_id: &Uuid,
) -> Result<Vec<Provider>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, full_name, role, created_at
         FROM providers WHERE tenant_id = ?1 ORDER BY full_name ASC",
    )?;
    let rows = stmt.query_map(params![tenant_id.to_string()], read_provider_row)?;

    let mut providers = Vec::new();
    for row in rows {
        providers.push(provider_from_row(row?)?);
    }
    Ok(providers)
}

struct ProviderRow {
    id: String,
    tenant_id: String,
    full_name: String,
    role: String,
    created_at: String,
}

fn read_provider_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderRow> {
    Ok(ProviderRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        full_name: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn provider_from_row(row: ProviderRow) -> Result<Provider, DatabaseError> {
    Ok(Provider {
        id: parse_uuid(&row.id)?,
        tenant_id: parse_uuid(&row.tenant_id)?,
        full_name: row.full_name,
        role: ProviderRole::from_str(&row.role)?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub full_name: String,
    /// Default anchor for protocol assignment.
    pub surgery_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

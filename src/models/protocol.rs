use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::TaskType;
use crate::scheduling::RecurrenceRule;

/// A named template of tasks positioned relative to a patient's surgery date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub tasks: Vec<ProtocolTaskDefinition>,
}

/// Immutable template entry. Never mutated per patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolTaskDefinition {
    pub id: Uuid,
    pub protocol_id: Uuid,
    pub title: String,
    pub task_type: TaskType,
    /// Days relative to the anchor; negative means before surgery.
    pub day_offset: i32,
    pub recurrence: RecurrenceRule,
    /// Stored descriptor that did not parse; `recurrence` then falls back
    /// to a single occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unrecognized_recurrence: Option<String>,
}

/// Record of a protocol being applied to a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolAssignment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub patient_id: Uuid,
    pub protocol_id: Uuid,
    pub anchor_date: NaiveDate,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: NaiveDateTime,
}

/// Task definition exactly as persisted: the recurrence is the stored
/// descriptor string, which may predate the current recurrence vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinitionRecord {
    pub id: Uuid,
    pub protocol_id: Uuid,
    pub title: String,
    pub task_type: TaskType,
    pub day_offset: i32,
    pub recurrence: String,
    pub recurrence_end_day: Option<i32>,
}

impl From<&ProtocolTaskDefinition> for TaskDefinitionRecord {
    fn from(def: &ProtocolTaskDefinition) -> Self {
        Self {
            id: def.id,
            protocol_id: def.protocol_id,
            title: def.title.clone(),
            task_type: def.task_type,
            day_offset: def.day_offset,
            recurrence: def
                .unrecognized_recurrence
                .clone()
                .unwrap_or_else(|| def.recurrence.pattern.descriptor()),
            recurrence_end_day: def.recurrence.end_day_offset,
        }
    }
}

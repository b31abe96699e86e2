use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{TaskStatus, TaskType};

/// One concrete, dated occurrence of a protocol task for a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientTaskInstance {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub assignment_id: Uuid,
    pub task_definition_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub status: TaskStatus,
    pub completion: Option<TaskCompletion>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub completed_at: NaiveDateTime,
    pub notes: Option<String>,
}

/// Task instance joined with its definition, for patient task lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub instance: PatientTaskInstance,
    pub title: String,
    pub task_type: TaskType,
}

//! Recurrence patterns for protocol task definitions.
//!
//! Stored as short descriptors (`none`, `daily`, `hourly`, `every_6_hours`,
//! `weekly`). Parsing is strict: an unknown descriptor is an error here, and
//! only the resolver's raw-descriptor path downgrades it to a warning.

use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("Unrecognized recurrence descriptor: {0}")]
    Unrecognized(String),

    #[error("Recurrence interval must be at least one hour")]
    ZeroInterval,
}

/// How often a task definition repeats after its first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    None,
    Daily,
    Hourly,
    EveryNHours { hours: NonZeroU32 },
    Weekly,
}

impl Recurrence {
    /// Spacing between occurrences in hours. `None` for a one-off task.
    pub fn step_hours(&self) -> Option<u64> {
        match self {
            Recurrence::None => None,
            Recurrence::Hourly => Some(1),
            Recurrence::EveryNHours { hours } => Some(u64::from(hours.get())),
            Recurrence::Daily => Some(24),
            Recurrence::Weekly => Some(24 * 7),
        }
    }

    /// Storage descriptor.
    pub fn descriptor(&self) -> String {
        match self {
            Recurrence::None => "none".into(),
            Recurrence::Daily => "daily".into(),
            Recurrence::Hourly => "hourly".into(),
            Recurrence::EveryNHours { hours } => format!("every_{hours}_hours"),
            Recurrence::Weekly => "weekly".into(),
        }
    }

    pub fn every_n_hours(hours: u32) -> Result<Self, RecurrenceError> {
        NonZeroU32::new(hours)
            .map(|hours| Recurrence::EveryNHours { hours })
            .ok_or(RecurrenceError::ZeroInterval)
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl FromStr for Recurrence {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "none" => Ok(Recurrence::None),
            "daily" => Ok(Recurrence::Daily),
            "hourly" => Ok(Recurrence::Hourly),
            "weekly" => Ok(Recurrence::Weekly),
            other => {
                let hours = other
                    .strip_prefix("every_")
                    .and_then(|rest| rest.strip_suffix("_hours"))
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| RecurrenceError::Unrecognized(s.to_string()))?;
                Recurrence::every_n_hours(hours)
            }
        }
    }
}

/// Recurrence pattern plus an optional inclusive end bound.
///
/// `end_day_offset` is measured from the anchor date, like the definition's
/// own `day_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub pattern: Recurrence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_day_offset: Option<i32>,
}

impl RecurrenceRule {
    pub fn once() -> Self {
        Self {
            pattern: Recurrence::None,
            end_day_offset: None,
        }
    }

    pub fn new(pattern: Recurrence) -> Self {
        Self {
            pattern,
            end_day_offset: None,
        }
    }

    pub fn until_day(mut self, end_day_offset: i32) -> Self {
        self.end_day_offset = Some(end_day_offset);
        self
    }
}

impl Default for RecurrenceRule {
    fn default() -> Self {
        Self::once()
    }
}

//! Recovery-protocol scheduling.
//!
//! A protocol is a template of task definitions positioned by day offset
//! relative to an anchor date (normally the surgery date). Scheduling turns
//! that template into dated, patient-specific task instances:
//!
//! - `recurrence`: the closed set of recurrence patterns and their parsing
//! - `resolver`: pure (anchor, offset, rule, horizon) → calendar dates
//! - `materializer`: writes one instance per resolved date, per definition

pub mod materializer;
pub mod recurrence;
pub mod resolver;

pub use materializer::{MaterializeFailure, MaterializeReport, TaskMaterializer};
pub use recurrence::{Recurrence, RecurrenceError, RecurrenceRule};
pub use resolver::{
    resolve_dates, resolve_dates_limited, resolve_descriptor, Horizon, Resolution, ResolveWarning,
};

//! Date/offset resolver.
//!
//! Pure function from (anchor date, day offset, recurrence rule, horizon) to
//! the ascending, deduplicated calendar dates a task occurs on. No hidden
//! state: the same inputs always give the same dates.
//!
//! Window rules:
//! - the first occurrence is `anchor + day_offset` (offsets may be negative)
//! - recurring occurrences lie in `[first, first + horizon_days)`
//! - an `end_day_offset` additionally caps dates at `anchor + end_day_offset`
//! - sub-daily patterns start at 00:00 of the first date and collapse to one
//!   date per calendar day
//! - the horizon never exceeds `MAX_HORIZON_DAYS`

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use super::recurrence::{Recurrence, RecurrenceRule};
use crate::config::{DEFAULT_HORIZON_DAYS, MAX_HORIZON_DAYS};

/// Look-ahead window for recurring tasks, in days. Always within
/// `1..=MAX_HORIZON_DAYS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    days: u32,
}

impl Horizon {
    pub fn days(days: u32) -> Self {
        Self {
            days: days.clamp(1, MAX_HORIZON_DAYS),
        }
    }

    pub fn as_days(&self) -> u32 {
        self.days
    }

    fn as_hours(&self) -> u64 {
        u64::from(self.days) * 24
    }
}

impl Default for Horizon {
    fn default() -> Self {
        Self::days(DEFAULT_HORIZON_DAYS)
    }
}

/// Non-fatal conditions noticed while resolving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolveWarning {
    /// Descriptor could not be parsed; a single occurrence was used instead.
    RecurrenceUnrecognized { descriptor: String },
}

/// Dates plus any warnings raised while resolving a raw descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub dates: Vec<NaiveDate>,
    pub warnings: Vec<ResolveWarning>,
}

/// Shift `anchor` by a signed number of days. `None` outside chrono's range.
pub fn offset_date(anchor: NaiveDate, day_offset: i32) -> Option<NaiveDate> {
    anchor.checked_add_signed(Duration::days(i64::from(day_offset)))
}

/// Resolve the calendar dates for one task definition.
///
/// `rule: None` (or a `Recurrence::None` pattern) yields exactly one date.
pub fn resolve_dates(
    anchor: NaiveDate,
    day_offset: i32,
    rule: Option<&RecurrenceRule>,
    horizon: Horizon,
) -> Vec<NaiveDate> {
    resolve_dates_limited(anchor, day_offset, rule, horizon, usize::MAX)
}

/// Like [`resolve_dates`], but stops after the first `limit` dates.
pub fn resolve_dates_limited(
    anchor: NaiveDate,
    day_offset: i32,
    rule: Option<&RecurrenceRule>,
    horizon: Horizon,
    limit: usize,
) -> Vec<NaiveDate> {
    if limit == 0 {
        return Vec::new();
    }
    let first = match offset_date(anchor, day_offset) {
        Some(date) => date,
        None => return Vec::new(),
    };

    let rule = rule.copied().unwrap_or_default();
    let step_hours = match rule.pattern.step_hours() {
        Some(step) => step,
        None => return vec![first],
    };

    // Last date allowed by the horizon, tightened by the end bound if any.
    let span = Duration::days(i64::from(horizon.as_days()) - 1);
    let mut last = first.checked_add_signed(span).unwrap_or(NaiveDate::MAX);
    if let Some(end) = rule.end_day_offset {
        match offset_date(anchor, end) {
            Some(end_date) if end_date < last => last = end_date,
            Some(_) => {}
            None => return Vec::new(),
        }
    }
    if last < first {
        return Vec::new();
    }

    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut elapsed_hours: u64 = 0;
    while elapsed_hours < horizon.as_hours() {
        let day = (elapsed_hours / 24) as i64;
        let date = match first.checked_add_signed(Duration::days(day)) {
            Some(date) => date,
            None => break,
        };
        if date > last {
            break;
        }
        if dates.last() != Some(&date) {
            dates.push(date);
            if dates.len() == limit {
                break;
            }
        }
        elapsed_hours += step_hours;
    }
    dates
}

/// Resolve from a raw stored descriptor string, keeping at most `limit`
/// dates.
///
/// Malformed descriptors do not fail: the task falls back to a single
/// occurrence and the returned `Resolution` carries a
/// `RecurrenceUnrecognized` warning.
pub fn resolve_descriptor(
    anchor: NaiveDate,
    day_offset: i32,
    descriptor: Option<&str>,
    end_day_offset: Option<i32>,
    horizon: Horizon,
    limit: usize,
) -> Resolution {
    let mut warnings = Vec::new();
    let pattern = match descriptor {
        None => Recurrence::None,
        Some(raw) => match raw.parse::<Recurrence>() {
            Ok(pattern) => pattern,
            Err(e) => {
                tracing::warn!(descriptor = raw, error = %e, "Recurrence unrecognized, scheduling once");
                warnings.push(ResolveWarning::RecurrenceUnrecognized {
                    descriptor: raw.to_string(),
                });
                Recurrence::None
            }
        },
    };

    let rule = RecurrenceRule {
        pattern,
        end_day_offset,
    };
    Resolution {
        dates: resolve_dates_limited(anchor, day_offset, Some(&rule), horizon, limit),
        warnings,
    }
}

//! Turns a protocol assignment into dated patient task instances.
//!
//! Each definition is written inside its own transaction; a failing
//! definition is logged, recorded in the report, and skipped while the rest
//! of the batch continues. Instances are unique on
//! (patient, definition, date), so re-running an assignment is a no-op.

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::resolver::{resolve_descriptor, Horizon, ResolveWarning};
use crate::config::SchedulingConfig;
use crate::db::{self, DatabaseError};
use crate::models::enums::TaskStatus;
use crate::models::{PatientTaskInstance, ProtocolAssignment, TaskDefinitionRecord};

/// A definition that could not be materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializeFailure {
    pub definition_id: Uuid,
    pub error: String,
}

/// Outcome of one materialization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub created: usize,
    pub duplicates_skipped: usize,
    pub failures: Vec<MaterializeFailure>,
    pub warnings: Vec<ResolveWarning>,
}

impl MaterializeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.warnings.is_empty()
    }
}

pub struct TaskMaterializer {
    horizon: Horizon,
    max_occurrences: usize,
}

impl TaskMaterializer {
    pub fn new(config: SchedulingConfig) -> Self {
        Self {
            horizon: Horizon::days(config.horizon_days),
            max_occurrences: config.max_occurrences_per_task,
        }
    }

    /// Write task instances for every definition of an assignment.
    pub fn materialize(
        &self,
        conn: &Connection,
        assignment: &ProtocolAssignment,
        definitions: &[TaskDefinitionRecord],
    ) -> MaterializeReport {
        let mut report = MaterializeReport::default();

        for def in definitions {
            match self.materialize_definition(conn, assignment, def, &mut report.warnings) {
                Ok((created, skipped)) => {
                    report.created += created;
                    report.duplicates_skipped += skipped;
                }
                Err(e) => {
                    tracing::warn!(
                        assignment_id = %assignment.id,
                        definition_id = %def.id,
                        error = %e,
                        "Task definition not materialized, continuing"
                    );
                    report.failures.push(MaterializeFailure {
                        definition_id: def.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            assignment_id = %assignment.id,
            patient_id = %assignment.patient_id,
            created = report.created,
            duplicates = report.duplicates_skipped,
            failures = report.failures.len(),
            "Protocol materialized"
        );
        report
    }

    fn materialize_definition(
        &self,
        conn: &Connection,
        assignment: &ProtocolAssignment,
        def: &TaskDefinitionRecord,
        warnings: &mut Vec<ResolveWarning>,
    ) -> Result<(usize, usize), DatabaseError> {
        if def.protocol_id != assignment.protocol_id {
            return Err(DatabaseError::ConstraintViolation(format!(
                "definition {} is not part of protocol {}",
                def.id, assignment.protocol_id
            )));
        }

        let mut resolution = resolve_descriptor(
            assignment.anchor_date,
            def.day_offset,
            Some(&def.recurrence),
            def.recurrence_end_day,
            self.horizon,
            self.max_occurrences,
        );
        warnings.append(&mut resolution.warnings);

        if resolution.dates.is_empty() {
            tracing::debug!(definition_id = %def.id, "No occurrences inside the window");
            return Ok((0, 0));
        }

        let created_at = db::now();
        let tx = conn.unchecked_transaction()?;
        let mut created = 0;
        let mut skipped = 0;
        for date in resolution.dates {
            let instance = PatientTaskInstance {
                id: Uuid::new_v4(),
                patient_id: assignment.patient_id,
                assignment_id: assignment.id,
                task_definition_id: def.id,
                scheduled_date: date,
                status: TaskStatus::Pending,
                completion: None,
                created_at,
            };
            if db::insert_task_instance(&tx, &instance)? {
                created += 1;
            } else {
                skipped += 1;
            }
        }
        tx.commit()?;
        Ok((created, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use crate::db::sqlite::open_memory_database;
    use crate::models::enums::*;
    use crate::models::*;
    use crate::scheduling::{Recurrence, RecurrenceRule};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ts() -> NaiveDateTime {
        date(2025, 1, 4).and_hms_opt(9, 0, 0).unwrap()
    }

    struct Fixture {
        conn: Connection,
        assignment: ProtocolAssignment,
        protocol: Protocol,
    }

    fn fixture(tasks: Vec<(i32, RecurrenceRule)>) -> Fixture {
        let conn = open_memory_database().unwrap();
        let tenant_id = Uuid::new_v4();
        db::insert_tenant(&conn, &Tenant {
            id: tenant_id,
            name: "Ortho".into(),
            kind: TenantKind::Practice,
            created_at: ts(),
        }).unwrap();
        let patient_id = Uuid::new_v4();
        db::insert_patient(&conn, &Patient {
            id: patient_id,
            tenant_id,
            full_name: "Ana".into(),
            surgery_date: Some(date(2025, 1, 17)),
            created_at: ts(),
        }).unwrap();

        let protocol_id = Uuid::new_v4();
        let protocol = Protocol {
            id: protocol_id,
            tenant_id,
            name: "Hip".into(),
            description: None,
            created_at: ts(),
            tasks: tasks
                .into_iter()
                .enumerate()
                .map(|(i, (day_offset, recurrence))| ProtocolTaskDefinition {
                    id: Uuid::new_v4(),
                    protocol_id,
                    title: format!("Task {i}"),
                    task_type: TaskType::Exercise,
                    day_offset,
                    recurrence,
                    unrecognized_recurrence: None,
                })
                .collect(),
        };
        db::insert_protocol(&conn, &protocol).unwrap();

        let assignment = ProtocolAssignment {
            id: Uuid::new_v4(),
            tenant_id,
            patient_id,
            protocol_id,
            anchor_date: date(2025, 1, 17),
            assigned_by: None,
            assigned_at: ts(),
        };
        db::insert_assignment(&conn, &assignment).unwrap();

        Fixture { conn, assignment, protocol }
    }

    fn records(f: &Fixture) -> Vec<TaskDefinitionRecord> {
        db::list_definition_records(&f.conn, &f.protocol.id).unwrap()
    }

    fn scheduled_dates(f: &Fixture) -> Vec<NaiveDate> {
        db::list_tasks_for_patient(&f.conn, &f.assignment.patient_id, None, None)
            .unwrap()
            .into_iter()
            .map(|t| t.instance.scheduled_date)
            .collect()
    }

    #[test]
    fn one_off_task_lands_before_surgery() {
        let f = fixture(vec![(-7, RecurrenceRule::once())]);
        let report = TaskMaterializer::new(SchedulingConfig::default())
            .materialize(&f.conn, &f.assignment, &records(&f));

        assert_eq!(report.created, 1);
        assert!(report.is_clean());
        assert_eq!(scheduled_dates(&f), vec![date(2025, 1, 10)]);
    }

    #[test]
    fn daily_task_capped_at_ten() {
        let f = fixture(vec![(0, RecurrenceRule::new(Recurrence::Daily))]);
        let report = TaskMaterializer::new(SchedulingConfig::default())
            .materialize(&f.conn, &f.assignment, &records(&f));

        assert_eq!(report.created, 10);
        let dates = scheduled_dates(&f);
        assert_eq!(dates.first(), Some(&date(2025, 1, 17)));
        assert_eq!(dates.last(), Some(&date(2025, 1, 26)));
    }

    #[test]
    fn cap_is_configurable() {
        let f = fixture(vec![(0, RecurrenceRule::new(Recurrence::Weekly))]);
        let config = SchedulingConfig {
            horizon_days: 90,
            max_occurrences_per_task: 100,
        };
        let report = TaskMaterializer::new(config).materialize(&f.conn, &f.assignment, &records(&f));
        assert_eq!(report.created, 13);
    }

    #[test]
    fn unbounded_horizon_still_writes_only_the_cap() {
        let f = fixture(vec![(0, RecurrenceRule::new(Recurrence::Hourly))]);
        let config = SchedulingConfig {
            horizon_days: u32::MAX,
            max_occurrences_per_task: 10,
        };
        let report = TaskMaterializer::new(config).materialize(&f.conn, &f.assignment, &records(&f));

        assert_eq!(report.created, 10);
        let dates = scheduled_dates(&f);
        assert_eq!(dates.first(), Some(&date(2025, 1, 17)));
        assert_eq!(dates.last(), Some(&date(2025, 1, 26)));
    }

    #[test]
    fn rerun_creates_no_duplicates() {
        let f = fixture(vec![
            (-7, RecurrenceRule::once()),
            (1, RecurrenceRule::new(Recurrence::Daily).until_day(5)),
        ]);
        let materializer = TaskMaterializer::new(SchedulingConfig::default());
        let defs = records(&f);

        let first = materializer.materialize(&f.conn, &f.assignment, &defs);
        assert_eq!(first.created, 6);

        let second = materializer.materialize(&f.conn, &f.assignment, &defs);
        assert_eq!(second.created, 0);
        assert_eq!(second.duplicates_skipped, 6);
        assert_eq!(db::count_tasks_for_assignment(&f.conn, &f.assignment.id).unwrap(), 6);
    }

    #[test]
    fn failing_definition_does_not_abort_batch() {
        let f = fixture(vec![(-7, RecurrenceRule::once()), (2, RecurrenceRule::once())]);
        let mut defs = records(&f);
        let foreign = TaskDefinitionRecord {
            id: Uuid::new_v4(),
            protocol_id: Uuid::new_v4(),
            ..defs[0].clone()
        };
        defs.insert(1, foreign.clone());

        let report = TaskMaterializer::new(SchedulingConfig::default())
            .materialize(&f.conn, &f.assignment, &defs);

        assert_eq!(report.created, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].definition_id, foreign.id);
        assert_eq!(scheduled_dates(&f), vec![date(2025, 1, 10), date(2025, 1, 19)]);
    }

    #[test]
    fn unpersisted_definition_rolls_back_only_itself() {
        let f = fixture(vec![(0, RecurrenceRule::once())]);
        let mut defs = records(&f);
        // Right protocol, but no definition row: the FK rejects the insert.
        defs.push(TaskDefinitionRecord {
            id: Uuid::new_v4(),
            ..defs[0].clone()
        });

        let report = TaskMaterializer::new(SchedulingConfig::default())
            .materialize(&f.conn, &f.assignment, &defs);

        assert_eq!(report.created, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(db::count_tasks_for_assignment(&f.conn, &f.assignment.id).unwrap(), 1);
    }

    #[test]
    fn unknown_descriptor_schedules_once_with_warning() {
        let f = fixture(vec![]);
        let def = TaskDefinitionRecord {
            id: Uuid::new_v4(),
            protocol_id: f.protocol.id,
            title: "Legacy reminder".into(),
            task_type: TaskType::Message,
            day_offset: 3,
            recurrence: "biweekly".into(),
            recurrence_end_day: None,
        };
        db::insert_task_definition(&f.conn, &def, 0).unwrap();

        let report = TaskMaterializer::new(SchedulingConfig::default())
            .materialize(&f.conn, &f.assignment, &records(&f));

        assert_eq!(report.created, 1);
        assert!(report.failures.is_empty());
        assert_eq!(
            report.warnings,
            vec![ResolveWarning::RecurrenceUnrecognized { descriptor: "biweekly".into() }]
        );
        assert_eq!(scheduled_dates(&f), vec![date(2025, 1, 20)]);
    }

    #[test]
    fn end_bound_before_first_occurrence_writes_nothing() {
        let f = fixture(vec![(5, RecurrenceRule::new(Recurrence::Daily).until_day(2))]);
        let report = TaskMaterializer::new(SchedulingConfig::default())
            .materialize(&f.conn, &f.assignment, &records(&f));
        assert_eq!(report.created, 0);
        assert!(report.failures.is_empty());
    }
}

//! `CareService`: the one object that owns the database connection, the
//! scheduling engine and the realtime fan-out.
//!
//! Constructed explicitly and passed to the API layer; there is no global
//! instance. Every tenant-scoped operation checks ownership before it reads
//! or writes, and every chat write publishes a change event after commit.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::db::{self, DatabaseError};
use crate::models::enums::{
    ConversationStatus, ParticipantRole, ProviderRole, TaskStatus, TaskType, TenantKind,
};
use crate::models::*;
use crate::realtime::{
    ChangeEvent, EventBus, SqliteTenantDirectory, Subscription, SubscriptionDispatcher,
    SubscriptionId, SubscriptionScope, TypingMonitor,
};
use crate::scheduling::{MaterializeReport, RecurrenceRule, TaskMaterializer};

/// Longest accepted chat message body, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Day offsets outside ±10 years are rejected at authoring time.
const MAX_DAY_OFFSET: i32 = 3650;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} belongs to another tenant")]
    TenantMismatch { entity: &'static str, id: Uuid },

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Protocol {protocol_id} is already assigned to patient {patient_id}")]
    AlreadyAssigned { patient_id: Uuid, protocol_id: Uuid },

    #[error("Conversation {0} is not accepting messages")]
    Closed(Uuid),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal lock error")]
    LockPoisoned,
}

fn invalid(msg: impl Into<String>) -> ServiceError {
    ServiceError::Validation(msg.into())
}

fn require_text(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

// ═══════════════════════════════════════════
// Request types
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub kind: TenantKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPatient {
    pub full_name: String,
    #[serde(default)]
    pub surgery_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProvider {
    pub full_name: String,
    pub role: ProviderRole,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTaskDefinition {
    pub title: String,
    pub task_type: TaskType,
    pub day_offset: i32,
    #[serde(default)]
    pub recurrence: RecurrenceRule,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProtocol {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub tasks: Vec<NewTaskDefinition>,
}

impl NewProtocol {
    pub fn validate(&self) -> Result<(), ServiceError> {
        require_text("protocol name", &self.name)?;
        if self.tasks.is_empty() {
            return Err(invalid("protocol needs at least one task"));
        }
        for task in &self.tasks {
            require_text("task title", &task.title)?;
            if task.day_offset.abs() > MAX_DAY_OFFSET {
                return Err(invalid(format!(
                    "day_offset {} outside ±{MAX_DAY_OFFSET}",
                    task.day_offset
                )));
            }
            if let Some(end) = task.recurrence.end_day_offset {
                if end < task.day_offset {
                    return Err(invalid(format!(
                        "task '{}' recurrence ends (day {end}) before it starts (day {})",
                        task.title, task.day_offset
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignProtocol {
    pub protocol_id: Uuid,
    /// Defaults to the patient's surgery date.
    #[serde(default)]
    pub anchor_date: Option<NaiveDate>,
    #[serde(default)]
    pub assigned_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentOutcome {
    pub assignment: ProtocolAssignment,
    pub report: MaterializeReport,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewParticipant {
    pub participant_id: Uuid,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    pub patient_id: Uuid,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub participants: Vec<NewParticipant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub body: String,
}

impl NewMessage {
    pub fn validate(&self) -> Result<(), ServiceError> {
        validate_body(&self.body)
    }
}

fn validate_body(body: &str) -> Result<(), ServiceError> {
    require_text("message body", body)?;
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(invalid(format!(
            "message body exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(())
}

// ═══════════════════════════════════════════
// Service
// ═══════════════════════════════════════════

pub struct CareService {
    conn: Arc<Mutex<Connection>>,
    config: ServiceConfig,
    bus: EventBus,
    directory: Arc<SqliteTenantDirectory>,
    dispatcher: SubscriptionDispatcher,
    typing: TypingMonitor,
    materializer: TaskMaterializer,
}

impl CareService {
    /// Build around an already-migrated connection.
    pub fn new(conn: Connection, config: ServiceConfig) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        let bus = EventBus::new(config.realtime.event_buffer);
        let directory = Arc::new(SqliteTenantDirectory::new(Arc::clone(&conn)));
        let dispatcher =
            SubscriptionDispatcher::new(directory.clone(), config.realtime.subscriber_buffer);
        let typing = TypingMonitor::new(
            bus.clone(),
            Duration::from_secs(config.realtime.typing_expiry_secs),
        );
        let materializer = TaskMaterializer::new(config.scheduling.clone());
        Self {
            conn,
            config,
            bus,
            directory,
            dispatcher,
            typing,
            materializer,
        }
    }

    /// Open (and migrate) the database at `config.database_path`.
    pub fn from_config(config: ServiceConfig) -> Result<Self, ServiceError> {
        let conn = db::open_database(Path::new(&config.database_path))?;
        Ok(Self::new(conn, config))
    }

    /// In-memory database; tests and demos.
    pub fn in_memory(config: ServiceConfig) -> Result<Self, ServiceError> {
        Ok(Self::new(db::open_memory_database()?, config))
    }

    /// Start realtime delivery. Must be called inside a tokio runtime.
    pub fn open(&self) {
        self.dispatcher.open(&self.bus);
    }

    /// Stop realtime delivery, ending every subscription stream.
    pub fn close(&self) {
        self.typing.shutdown();
        self.dispatcher.close();
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ServiceError> {
        self.conn.lock().map_err(|_| ServiceError::LockPoisoned)
    }

    // ─── Tenants ─────────────────────────────────────────

    pub fn create_tenant(&self, req: NewTenant) -> Result<Tenant, ServiceError> {
        require_text("tenant name", &req.name)?;
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            kind: req.kind,
            created_at: db::now(),
        };
        db::insert_tenant(&*self.conn()?, &tenant)?;
        tracing::info!(tenant_id = %tenant.id, kind = %tenant.kind, "Tenant created");
        Ok(tenant)
    }

    pub fn get_tenant(&self, id: &Uuid) -> Result<Tenant, ServiceError> {
        db::get_tenant(&*self.conn()?, id)?.ok_or(ServiceError::NotFound {
            entity: "Tenant",
            id: *id,
        })
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>, ServiceError> {
        Ok(db::list_tenants(&*self.conn()?)?)
    }

    // ─── People ──────────────────────────────────────────

    pub fn create_patient(&self, tenant_id: &Uuid, req: NewPatient) -> Result<Patient, ServiceError> {
        require_text("patient name", &req.full_name)?;
        let conn = self.conn()?;
        require_tenant(&conn, tenant_id)?;
        let patient = Patient {
            id: Uuid::new_v4(),
            tenant_id: *tenant_id,
            full_name: req.full_name.trim().to_string(),
            surgery_date: req.surgery_date,
            created_at: db::now(),
        };
        db::insert_patient(&conn, &patient)?;
        tracing::info!(tenant_id = %tenant_id, patient_id = %patient.id, "Patient created");
        Ok(patient)
    }

    pub fn get_patient(&self, tenant_id: &Uuid, id: &Uuid) -> Result<Patient, ServiceError> {
        owned_patient(&*self.conn()?, tenant_id, id)
    }

    pub fn list_patients(&self, tenant_id: &Uuid) -> Result<Vec<Patient>, ServiceError> {
        Ok(db::list_patients_by_tenant(&*self.conn()?, tenant_id)?)
    }

    pub fn create_provider(
        &self,
        tenant_id: &Uuid,
        req: NewProvider,
    ) -> Result<Provider, ServiceError> {
        require_text("provider name", &req.full_name)?;
        let conn = self.conn()?;
        require_tenant(&conn, tenant_id)?;
        let provider = Provider {
            id: Uuid::new_v4(),
            tenant_id: *tenant_id,
            full_name: req.full_name.trim().to_string(),
            role: req.role,
            created_at: db::now(),
        };
        db::insert_provider(&conn, &provider)?;
        tracing::info!(tenant_id = %tenant_id, provider_id = %provider.id, role = %provider.role, "Provider created");
        Ok(provider)
    }

    pub fn list_providers(&self, tenant_id: &Uuid) -> Result<Vec<Provider>, ServiceError> {
        Ok(db::list_providers_by_tenant(&*self.conn()?, tenant_id)?)
    }

    // ─── Protocols & scheduling ──────────────────────────

    pub fn create_protocol(
        &self,
        tenant_id: &Uuid,
        req: NewProtocol,
    ) -> Result<Protocol, ServiceError> {
        req.validate()?;
        let conn = self.conn()?;
        require_tenant(&conn, tenant_id)?;

        let id = Uuid::new_v4();
        let protocol = Protocol {
            id,
            tenant_id: *tenant_id,
            name: req.name.trim().to_string(),
            description: req.description,
            created_at: db::now(),
            tasks: req
                .tasks
                .into_iter()
                .map(|task| ProtocolTaskDefinition {
                    id: Uuid::new_v4(),
                    protocol_id: id,
                    title: task.title.trim().to_string(),
                    task_type: task.task_type,
                    day_offset: task.day_offset,
                    recurrence: task.recurrence,
                    unrecognized_recurrence: None,
                })
                .collect(),
        };
        db::insert_protocol(&conn, &protocol)?;
        tracing::info!(
            tenant_id = %tenant_id,
            protocol_id = %protocol.id,
            tasks = protocol.tasks.len(),
            "Protocol created"
        );
        Ok(protocol)
    }

    pub fn get_protocol(&self, tenant_id: &Uuid, id: &Uuid) -> Result<Protocol, ServiceError> {
        let protocol = db::get_protocol(&*self.conn()?, id)?.ok_or(ServiceError::NotFound {
            entity: "Protocol",
            id: *id,
        })?;
        check_tenant("Protocol", id, tenant_id, &protocol.tenant_id)?;
        Ok(protocol)
    }

    pub fn list_protocols(&self, tenant_id: &Uuid) -> Result<Vec<Protocol>, ServiceError> {
        Ok(db::list_protocols_by_tenant(&*self.conn()?, tenant_id)?)
    }

    /// Apply a protocol to a patient and materialize its tasks.
    ///
    /// A protocol can be assigned to a patient once; a second request fails
    /// with `AlreadyAssigned` and writes nothing.
    pub fn assign_protocol(
        &self,
        tenant_id: &Uuid,
        patient_id: &Uuid,
        req: AssignProtocol,
    ) -> Result<AssignmentOutcome, ServiceError> {
        let conn = self.conn()?;
        let patient = owned_patient(&conn, tenant_id, patient_id)?;

        let protocol_tenant =
            db::get_protocol_tenant(&conn, &req.protocol_id)?.ok_or(ServiceError::NotFound {
                entity: "Protocol",
                id: req.protocol_id,
            })?;
        check_tenant("Protocol", &req.protocol_id, tenant_id, &protocol_tenant)?;

        if let Some(provider_id) = req.assigned_by {
            let provider = db::get_provider(&conn, &provider_id)?.ok_or(ServiceError::NotFound {
                entity: "Provider",
                id: provider_id,
            })?;
            check_tenant("Provider", &provider_id, tenant_id, &provider.tenant_id)?;
        }

        let anchor_date = req.anchor_date.or(patient.surgery_date).ok_or_else(|| {
            invalid("anchor_date is required when the patient has no surgery date")
        })?;

        let already = || ServiceError::AlreadyAssigned {
            patient_id: *patient_id,
            protocol_id: req.protocol_id,
        };
        if db::find_assignment(&conn, patient_id, &req.protocol_id)?.is_some() {
            return Err(already());
        }

        let assignment = ProtocolAssignment {
            id: Uuid::new_v4(),
            tenant_id: *tenant_id,
            patient_id: *patient_id,
            protocol_id: req.protocol_id,
            anchor_date,
            assigned_by: req.assigned_by,
            assigned_at: db::now(),
        };
        match db::insert_assignment(&conn, &assignment) {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => return Err(already()),
            Err(e) => return Err(e.into()),
        }

        let definitions = db::list_definition_records(&conn, &req.protocol_id)?;
        let report = self.materializer.materialize(&conn, &assignment, &definitions);
        Ok(AssignmentOutcome { assignment, report })
    }

    pub fn list_patient_tasks(
        &self,
        tenant_id: &Uuid,
        patient_id: &Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<TaskView>, ServiceError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(invalid("from must not be after to"));
            }
        }
        let conn = self.conn()?;
        owned_patient(&conn, tenant_id, patient_id)?;
        Ok(db::list_tasks_for_patient(&conn, patient_id, from, to)?)
    }

    /// Move a task forward. Repeating the current status is a no-op.
    pub fn update_task_status(
        &self,
        tenant_id: &Uuid,
        task_id: &Uuid,
        status: TaskStatus,
        notes: Option<String>,
    ) -> Result<PatientTaskInstance, ServiceError> {
        let conn = self.conn()?;
        let task = db::get_task_instance(&conn, task_id)?.ok_or(ServiceError::NotFound {
            entity: "Task",
            id: *task_id,
        })?;
        owned_patient(&conn, tenant_id, &task.patient_id).map_err(|e| match e {
            ServiceError::TenantMismatch { .. } => ServiceError::TenantMismatch {
                entity: "Task",
                id: *task_id,
            },
            other => other,
        })?;

        if task.status == status {
            return Ok(task);
        }
        if !task.status.can_transition_to(status) {
            return Err(ServiceError::InvalidTransition {
                entity: "task",
                from: task.status.to_string(),
                to: status.to_string(),
            });
        }

        let completion = (status == TaskStatus::Completed).then(|| TaskCompletion {
            completed_at: db::now(),
            notes,
        });
        db::update_task_status(&conn, task_id, status, completion.as_ref())?;
        tracing::info!(task_id = %task_id, from = %task.status, to = %status, "Task status updated");

        Ok(PatientTaskInstance {
            status,
            completion,
            ..task
        })
    }

    // ─── Conversations ───────────────────────────────────

    pub fn start_conversation(
        &self,
        tenant_id: &Uuid,
        req: NewConversation,
    ) -> Result<Conversation, ServiceError> {
        let conversation = {
            let conn = self.conn()?;
            owned_patient(&conn, tenant_id, &req.patient_id)?;

            let now = db::now();
            let mut participants = vec![Participant {
                participant_id: req.patient_id,
                role: ParticipantRole::Patient,
                joined_at: now,
            }];
            for p in &req.participants {
                if participants.iter().any(|existing| existing.participant_id == p.participant_id) {
                    continue;
                }
                match p.role {
                    ParticipantRole::Patient => {
                        return Err(invalid("a conversation has exactly one patient"));
                    }
                    ParticipantRole::Provider | ParticipantRole::Nurse => {
                        let provider = db::get_provider(&conn, &p.participant_id)?.ok_or(
                            ServiceError::NotFound {
                                entity: "Provider",
                                id: p.participant_id,
                            },
                        )?;
                        check_tenant("Provider", &p.participant_id, tenant_id, &provider.tenant_id)?;
                    }
                }
                participants.push(Participant {
                    participant_id: p.participant_id,
                    role: p.role,
                    joined_at: now,
                });
            }

            let conversation = Conversation {
                id: Uuid::new_v4(),
                tenant_id: *tenant_id,
                patient_id: req.patient_id,
                subject: req.subject.filter(|s| !s.trim().is_empty()),
                status: ConversationStatus::Active,
                participants,
                created_at: now,
                updated_at: now,
            };
            db::insert_conversation(&conn, &conversation)?;
            conversation
        };

        self.directory.remember(conversation.id, conversation.tenant_id);
        tracing::info!(tenant_id = %tenant_id, conversation_id = %conversation.id, "Conversation started");
        self.bus.publish(ChangeEvent::ConversationUpdated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    pub fn get_conversation(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> Result<Conversation, ServiceError> {
        owned_conversation(&*self.conn()?, tenant_id, id)
    }

    pub fn list_conversations(&self, tenant_id: &Uuid) -> Result<Vec<Conversation>, ServiceError> {
        Ok(db::list_conversations_by_tenant(&*self.conn()?, tenant_id)?)
    }

    pub fn set_conversation_status(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
        status: ConversationStatus,
    ) -> Result<Conversation, ServiceError> {
        let conversation = {
            let conn = self.conn()?;
            let current = owned_conversation(&conn, tenant_id, id)?;
            if current.status == status {
                return Ok(current);
            }
            if !current.status.can_transition_to(status) {
                return Err(ServiceError::InvalidTransition {
                    entity: "conversation",
                    from: current.status.to_string(),
                    to: status.to_string(),
                });
            }
            db::update_conversation_status(&conn, id, status, &db::now())?;
            owned_conversation(&conn, tenant_id, id)?
        };

        tracing::info!(conversation_id = %id, status = %status, "Conversation status changed");
        self.bus.publish(ChangeEvent::ConversationUpdated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    // ─── Messages ────────────────────────────────────────

    pub fn send_message(
        &self,
        tenant_id: &Uuid,
        conversation_id: &Uuid,
        req: NewMessage,
    ) -> Result<ChatMessage, ServiceError> {
        req.validate()?;
        let message = {
            let conn = self.conn()?;
            let conversation = owned_conversation(&conn, tenant_id, conversation_id)?;
            if !conversation.status.accepts_messages() {
                return Err(ServiceError::Closed(*conversation_id));
            }
            let sender = participant(&conversation, &req.sender_id)?;

            let message = ChatMessage {
                id: Uuid::new_v4(),
                conversation_id: *conversation_id,
                sender_id: req.sender_id,
                sender_role: sender.role,
                body: req.body,
                sent_at: db::now(),
                edited: false,
                read_by: Vec::new(),
            };
            db::insert_message(&conn, &message)?;
            message
        };

        // Sending ends the sender's typing state.
        self.typing.stop(*conversation_id, message.sender_id);
        tracing::debug!(conversation_id = %conversation_id, message_id = %message.id, "Message sent");
        self.bus.publish(ChangeEvent::MessageInserted {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Replace a message body. Only the original sender may edit.
    pub fn edit_message(
        &self,
        tenant_id: &Uuid,
        message_id: &Uuid,
        editor_id: &Uuid,
        body: String,
    ) -> Result<ChatMessage, ServiceError> {
        validate_body(&body)?;
        let message = {
            let conn = self.conn()?;
            let (message, conversation) = owned_message(&conn, tenant_id, message_id)?;
            if message.sender_id != *editor_id {
                return Err(invalid("only the sender may edit a message"));
            }
            if !conversation.status.accepts_messages() {
                return Err(ServiceError::Closed(conversation.id));
            }
            db::update_message_body(&conn, message_id, &body)?;
            load_message(&conn, message_id)?
        };

        self.bus.publish(ChangeEvent::MessageUpdated {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Record a read receipt. Re-reading publishes nothing.
    pub fn mark_message_read(
        &self,
        tenant_id: &Uuid,
        message_id: &Uuid,
        reader_id: &Uuid,
    ) -> Result<ChatMessage, ServiceError> {
        let (message, first_read) = {
            let conn = self.conn()?;
            let (_, conversation) = owned_message(&conn, tenant_id, message_id)?;
            participant(&conversation, reader_id)?;
            let first_read = db::insert_message_read(&conn, message_id, reader_id, &db::now())?;
            (load_message(&conn, message_id)?, first_read)
        };

        if first_read {
            self.bus.publish(ChangeEvent::MessageUpdated {
                message: message.clone(),
            });
        }
        Ok(message)
    }

    pub fn list_messages(
        &self,
        tenant_id: &Uuid,
        conversation_id: &Uuid,
    ) -> Result<Vec<ChatMessage>, ServiceError> {
        let conn = self.conn()?;
        owned_conversation(&conn, tenant_id, conversation_id)?;
        Ok(db::get_messages_by_conversation(&conn, conversation_id)?)
    }

    /// Report typing activity. Must be called inside a tokio runtime.
    pub fn set_typing(
        &self,
        tenant_id: &Uuid,
        conversation_id: &Uuid,
        user_id: &Uuid,
        is_typing: bool,
    ) -> Result<(), ServiceError> {
        {
            let conn = self.conn()?;
            let conversation = owned_conversation(&conn, tenant_id, conversation_id)?;
            participant(&conversation, user_id)?;
        }
        if is_typing {
            self.typing.activity(*conversation_id, *user_id);
        } else {
            self.typing.stop(*conversation_id, *user_id);
        }
        Ok(())
    }

    // ─── Subscriptions ───────────────────────────────────

    /// Register a realtime subscription after checking the scope belongs to
    /// its tenant.
    pub fn subscribe(&self, scope: SubscriptionScope) -> Result<Subscription, ServiceError> {
        {
            let conn = self.conn()?;
            let tenant_id = scope.tenant_id();
            require_tenant(&conn, &tenant_id)?;
            match scope {
                SubscriptionScope::Provider { provider_id, .. } => {
                    let provider = db::get_provider(&conn, &provider_id)?.ok_or(
                        ServiceError::NotFound {
                            entity: "Provider",
                            id: provider_id,
                        },
                    )?;
                    check_tenant("Provider", &provider_id, &tenant_id, &provider.tenant_id)?;
                }
                SubscriptionScope::Conversation {
                    conversation_id, ..
                } => {
                    owned_conversation(&conn, &tenant_id, &conversation_id)?;
                }
            }
        }
        Ok(self.dispatcher.subscribe(scope))
    }

    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    pub fn dispatcher(&self) -> &SubscriptionDispatcher {
        &self.dispatcher
    }
}

impl Drop for CareService {
    fn drop(&mut self) {
        self.typing.shutdown();
    }
}

// ─── Ownership helpers ───────────────────────────────────

fn check_tenant(
    entity: &'static str,
    id: &Uuid,
    expected: &Uuid,
    actual: &Uuid,
) -> Result<(), ServiceError> {
    if expected != actual {
        tracing::warn!(entity, id = %id, tenant_id = %expected, "Cross-tenant access rejected");
        return Err(ServiceError::TenantMismatch { entity, id: *id });
    }
    Ok(())
}

fn require_tenant(conn: &Connection, tenant_id: &Uuid) -> Result<Tenant, ServiceError> {
    db::get_tenant(conn, tenant_id)?.ok_or(ServiceError::NotFound {
        entity: "Tenant",
        id: *tenant_id,
    })
}

fn owned_patient(conn: &Connection, tenant_id: &Uuid, id: &Uuid) -> Result<Patient, ServiceError> {
    let patient = db::get_patient(conn, id)?.ok_or(ServiceError::NotFound {
        entity: "Patient",
        id: *id,
    })?;
    check_tenant("Patient", id, tenant_id, &patient.tenant_id)?;
    Ok(patient)
}

fn owned_conversation(
    conn: &Connection,
    tenant_id: &Uuid,
    id: &Uuid,
) -> Result<Conversation, ServiceError> {
    let conversation = db::get_conversation(conn, id)?.ok_or(ServiceError::NotFound {
        entity: "Conversation",
        id: *id,
    })?;
    check_tenant("Conversation", id, tenant_id, &conversation.tenant_id)?;
    Ok(conversation)
}

fn load_message(conn: &Connection, id: &Uuid) -> Result<ChatMessage, ServiceError> {
    db::get_message(conn, id)?.ok_or(ServiceError::NotFound {
        entity: "Message",
        id: *id,
    })
}

fn owned_message(
    conn: &Connection,
    tenant_id: &Uuid,
    id: &Uuid,
) -> Result<(ChatMessage, Conversation), ServiceError> {
    let message = load_message(conn, id)?;
    let conversation = owned_conversation(conn, tenant_id, &message.conversation_id)?;
    Ok((message, conversation))
}

fn participant<'a>(
    conversation: &'a Conversation,
    user_id: &Uuid,
) -> Result<&'a Participant, ServiceError> {
    conversation
        .participants
        .iter()
        .find(|p| p.participant_id == *user_id)
        .ok_or_else(|| invalid(format!("{user_id} is not a participant in this conversation")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::EventEnvelope;
    use crate::scheduling::{Recurrence, ResolveWarning};

    fn service() -> CareService {
        CareService::in_memory(ServiceConfig::default()).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Clinic {
        tenant: Tenant,
        patient: Patient,
        nurse: Provider,
    }

    fn clinic(svc: &CareService, name: &str) -> Clinic {
        let tenant = svc
            .create_tenant(NewTenant { name: name.into(), kind: TenantKind::Clinic })
            .unwrap();
        let patient = svc
            .create_patient(&tenant.id, NewPatient {
                full_name: "Maria Lopez".into(),
                surgery_date: Some(date(2025, 1, 17)),
            })
            .unwrap();
        let nurse = svc
            .create_provider(&tenant.id, NewProvider {
                full_name: "Sam Okafor".into(),
                role: ProviderRole::Nurse,
            })
            .unwrap();
        Clinic { tenant, patient, nurse }
    }

    fn knee_protocol(svc: &CareService, tenant_id: &Uuid) -> Protocol {
        svc.create_protocol(tenant_id, NewProtocol {
            name: "Knee replacement".into(),
            description: None,
            tasks: vec![
                NewTaskDefinition {
                    title: "Pre-op form".into(),
                    task_type: TaskType::Form,
                    day_offset: -7,
                    recurrence: RecurrenceRule::once(),
                },
                NewTaskDefinition {
                    title: "Ankle pumps".into(),
                    task_type: TaskType::Exercise,
                    day_offset: 0,
                    recurrence: RecurrenceRule::new(Recurrence::Daily),
                },
            ],
        })
        .unwrap()
    }

    fn conversation(svc: &CareService, c: &Clinic) -> Conversation {
        svc.start_conversation(&c.tenant.id, NewConversation {
            patient_id: c.patient.id,
            subject: Some("Recovery".into()),
            participants: vec![NewParticipant {
                participant_id: c.nurse.id,
                role: ParticipantRole::Nurse,
            }],
        })
        .unwrap()
    }

    async fn next(sub: &mut Subscription) -> EventEnvelope {
        tokio::time::timeout(Duration::from_secs(1), sub.receiver.recv())
            .await
            .expect("timed out")
            .expect("stream ended")
    }

    #[test]
    fn assignment_defaults_anchor_to_surgery_date() {
        let svc = service();
        let c = clinic(&svc, "North");
        let protocol = knee_protocol(&svc, &c.tenant.id);

        let outcome = svc
            .assign_protocol(&c.tenant.id, &c.patient.id, AssignProtocol {
                protocol_id: protocol.id,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.assignment.anchor_date, date(2025, 1, 17));
        assert_eq!(outcome.report.created, 11);

        let tasks = svc.list_patient_tasks(&c.tenant.id, &c.patient.id, None, None).unwrap();
        assert_eq!(tasks[0].instance.scheduled_date, date(2025, 1, 10));
        assert_eq!(tasks[0].title, "Pre-op form");
        let exercise: Vec<NaiveDate> = tasks
            .iter()
            .filter(|t| t.task_type == TaskType::Exercise)
            .map(|t| t.instance.scheduled_date)
            .collect();
        assert_eq!(exercise.len(), 10);
        assert_eq!(exercise[0], date(2025, 1, 17));
        assert_eq!(exercise[9], date(2025, 1, 26));
    }

    #[test]
    fn explicit_anchor_overrides_surgery_date() {
        let svc = service();
        let c = clinic(&svc, "North");
        let protocol = knee_protocol(&svc, &c.tenant.id);
        let outcome = svc
            .assign_protocol(&c.tenant.id, &c.patient.id, AssignProtocol {
                protocol_id: protocol.id,
                anchor_date: Some(date(2025, 3, 1)),
                assigned_by: Some(c.nurse.id),
            })
            .unwrap();
        assert_eq!(outcome.assignment.anchor_date, date(2025, 3, 1));
        assert_eq!(outcome.assignment.assigned_by, Some(c.nurse.id));
    }

    #[test]
    fn missing_anchor_is_validation_error() {
        let svc = service();
        let c = clinic(&svc, "North");
        let patient = svc
            .create_patient(&c.tenant.id, NewPatient { full_name: "No Date".into(), surgery_date: None })
            .unwrap();
        let protocol = knee_protocol(&svc, &c.tenant.id);
        let result = svc.assign_protocol(&c.tenant.id, &patient.id, AssignProtocol {
            protocol_id: protocol.id,
            ..Default::default()
        });
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn double_assignment_rejected_without_new_tasks() {
        let svc = service();
        let c = clinic(&svc, "North");
        let protocol = knee_protocol(&svc, &c.tenant.id);
        let req = AssignProtocol { protocol_id: protocol.id, ..Default::default() };

        svc.assign_protocol(&c.tenant.id, &c.patient.id, req.clone()).unwrap();
        let second = svc.assign_protocol(&c.tenant.id, &c.patient.id, req);
        assert!(matches!(second, Err(ServiceError::AlreadyAssigned { .. })));
        assert_eq!(svc.list_patient_tasks(&c.tenant.id, &c.patient.id, None, None).unwrap().len(), 11);
    }

    #[test]
    fn cross_tenant_assignment_rejected() {
        let svc = service();
        let a = clinic(&svc, "A");
        let b = clinic(&svc, "B");
        let protocol_b = knee_protocol(&svc, &b.tenant.id);

        let result = svc.assign_protocol(&a.tenant.id, &a.patient.id, AssignProtocol {
            protocol_id: protocol_b.id,
            ..Default::default()
        });
        assert!(matches!(result, Err(ServiceError::TenantMismatch { entity: "Protocol", .. })));

        let result = svc.list_patient_tasks(&b.tenant.id, &a.patient.id, None, None);
        assert!(matches!(result, Err(ServiceError::TenantMismatch { .. })));
    }

    #[test]
    fn legacy_descriptor_reported_as_warning() {
        let svc = service();
        let c = clinic(&svc, "North");
        let protocol = knee_protocol(&svc, &c.tenant.id);
        db::insert_task_definition(&*svc.conn().unwrap(), &TaskDefinitionRecord {
            id: Uuid::new_v4(),
            protocol_id: protocol.id,
            title: "Check-in call".into(),
            task_type: TaskType::Message,
            day_offset: 14,
            recurrence: "monthly".into(),
            recurrence_end_day: None,
        }, 2).unwrap();

        let outcome = svc
            .assign_protocol(&c.tenant.id, &c.patient.id, AssignProtocol {
                protocol_id: protocol.id,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.report.created, 12);
        assert_eq!(
            outcome.report.warnings,
            vec![ResolveWarning::RecurrenceUnrecognized { descriptor: "monthly".into() }]
        );
    }

    #[test]
    fn protocol_with_legacy_descriptor_stays_readable() {
        let svc = service();
        let c = clinic(&svc, "North");
        let protocol = knee_protocol(&svc, &c.tenant.id);
        db::insert_task_definition(&*svc.conn().unwrap(), &TaskDefinitionRecord {
            id: Uuid::new_v4(),
            protocol_id: protocol.id,
            title: "Check-in call".into(),
            task_type: TaskType::Message,
            day_offset: 14,
            recurrence: "monthly".into(),
            recurrence_end_day: Some(60),
        }, 2).unwrap();

        let loaded = svc.get_protocol(&c.tenant.id, &protocol.id).unwrap();
        assert_eq!(loaded.tasks.len(), 3);
        assert_eq!(loaded.tasks[2].recurrence, RecurrenceRule::once().until_day(60));
        assert_eq!(loaded.tasks[2].unrecognized_recurrence.as_deref(), Some("monthly"));

        let listed = svc.list_protocols(&c.tenant.id).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn tenants_listed_by_name() {
        let svc = service();
        assert!(svc.list_tenants().unwrap().is_empty());
        clinic(&svc, "South");
        clinic(&svc, "North");

        let names: Vec<String> = svc.list_tenants().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["North".to_string(), "South".to_string()]);
    }

    #[test]
    fn protocol_validation() {
        let svc = service();
        let c = clinic(&svc, "North");
        let empty = svc.create_protocol(&c.tenant.id, NewProtocol {
            name: "Empty".into(),
            description: None,
            tasks: vec![],
        });
        assert!(matches!(empty, Err(ServiceError::Validation(_))));

        let backwards = svc.create_protocol(&c.tenant.id, NewProtocol {
            name: "Backwards".into(),
            description: None,
            tasks: vec![NewTaskDefinition {
                title: "Walk".into(),
                task_type: TaskType::Exercise,
                day_offset: 10,
                recurrence: RecurrenceRule::new(Recurrence::Daily).until_day(5),
            }],
        });
        assert!(matches!(backwards, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn task_status_moves_forward_only() {
        let svc = service();
        let c = clinic(&svc, "North");
        let protocol = knee_protocol(&svc, &c.tenant.id);
        svc.assign_protocol(&c.tenant.id, &c.patient.id, AssignProtocol {
            protocol_id: protocol.id,
            ..Default::default()
        })
        .unwrap();
        let task_id = svc.list_patient_tasks(&c.tenant.id, &c.patient.id, None, None).unwrap()[0]
            .instance
            .id;

        let started = svc.update_task_status(&c.tenant.id, &task_id, TaskStatus::InProgress, None).unwrap();
        assert_eq!(started.status, TaskStatus::InProgress);
        assert!(started.completion.is_none());

        let done = svc
            .update_task_status(&c.tenant.id, &task_id, TaskStatus::Completed, Some("all good".into()))
            .unwrap();
        assert_eq!(done.completion.as_ref().and_then(|c| c.notes.as_deref()), Some("all good"));

        let back = svc.update_task_status(&c.tenant.id, &task_id, TaskStatus::Pending, None);
        assert!(matches!(back, Err(ServiceError::InvalidTransition { .. })));

        let again = svc.update_task_status(&c.tenant.id, &task_id, TaskStatus::Completed, None).unwrap();
        assert_eq!(again.completion, done.completion);
    }

    #[test]
    fn task_from_other_tenant_is_hidden() {
        let svc = service();
        let a = clinic(&svc, "A");
        let b = clinic(&svc, "B");
        let protocol = knee_protocol(&svc, &a.tenant.id);
        svc.assign_protocol(&a.tenant.id, &a.patient.id, AssignProtocol {
            protocol_id: protocol.id,
            ..Default::default()
        })
        .unwrap();
        let task_id = svc.list_patient_tasks(&a.tenant.id, &a.patient.id, None, None).unwrap()[0]
            .instance
            .id;
        let result = svc.update_task_status(&b.tenant.id, &task_id, TaskStatus::Completed, None);
        assert!(matches!(result, Err(ServiceError::TenantMismatch { entity: "Task", .. })));
    }

    #[test]
    fn closed_conversation_rejects_messages() {
        let svc = service();
        let c = clinic(&svc, "North");
        let conv = conversation(&svc, &c);
        svc.set_conversation_status(&c.tenant.id, &conv.id, ConversationStatus::Closed).unwrap();

        let result = svc.send_message(&c.tenant.id, &conv.id, NewMessage {
            sender_id: c.nurse.id,
            body: "Hello?".into(),
        });
        assert!(matches!(result, Err(ServiceError::Closed(_))));

        let reopen = svc.set_conversation_status(&c.tenant.id, &conv.id, ConversationStatus::Active);
        assert!(matches!(reopen, Err(ServiceError::InvalidTransition { .. })));
    }

    #[test]
    fn only_participants_send_and_only_sender_edits() {
        let svc = service();
        let c = clinic(&svc, "North");
        let conv = conversation(&svc, &c);

        let stranger = svc.send_message(&c.tenant.id, &conv.id, NewMessage {
            sender_id: Uuid::new_v4(),
            body: "hi".into(),
        });
        assert!(matches!(stranger, Err(ServiceError::Validation(_))));

        let msg = svc
            .send_message(&c.tenant.id, &conv.id, NewMessage { sender_id: c.patient.id, body: "Knee is sore".into() })
            .unwrap();
        assert_eq!(msg.sender_role, ParticipantRole::Patient);

        let by_nurse = svc.edit_message(&c.tenant.id, &msg.id, &c.nurse.id, "changed".into());
        assert!(matches!(by_nurse, Err(ServiceError::Validation(_))));

        let edited = svc.edit_message(&c.tenant.id, &msg.id, &c.patient.id, "Knee is a bit sore".into()).unwrap();
        assert!(edited.edited);

        let read = svc.mark_message_read(&c.tenant.id, &msg.id, &c.nurse.id).unwrap();
        assert_eq!(read.read_by, vec![c.nurse.id]);
        assert_eq!(svc.list_messages(&c.tenant.id, &conv.id).unwrap().len(), 1);
    }

    #[test]
    fn oversized_message_rejected() {
        let svc = service();
        let c = clinic(&svc, "North");
        let conv = conversation(&svc, &c);
        let result = svc.send_message(&c.tenant.id, &conv.id, NewMessage {
            sender_id: c.patient.id,
            body: "x".repeat(MAX_MESSAGE_CHARS + 1),
        });
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn subscription_scope_must_belong_to_tenant() {
        let svc = service();
        let a = clinic(&svc, "A");
        let b = clinic(&svc, "B");
        let conv_b = conversation(&svc, &b);

        let result = svc.subscribe(SubscriptionScope::Conversation {
            tenant_id: a.tenant.id,
            conversation_id: conv_b.id,
        });
        assert!(matches!(result, Err(ServiceError::TenantMismatch { .. })));

        let result = svc.subscribe(SubscriptionScope::Provider {
            tenant_id: a.tenant.id,
            provider_id: b.nurse.id,
        });
        assert!(matches!(result, Err(ServiceError::TenantMismatch { .. })));
    }

    #[tokio::test]
    async fn chat_events_reach_only_own_tenant() {
        let svc = service();
        let a = clinic(&svc, "A");
        let b = clinic(&svc, "B");
        svc.open();

        let mut sub_a = svc
            .subscribe(SubscriptionScope::Provider { tenant_id: a.tenant.id, provider_id: a.nurse.id })
            .unwrap();
        let mut sub_b = svc
            .subscribe(SubscriptionScope::Provider { tenant_id: b.tenant.id, provider_id: b.nurse.id })
            .unwrap();

        let conv_a = conversation(&svc, &a);
        let conv_b = conversation(&svc, &b);
        for i in 0..3 {
            svc.send_message(&a.tenant.id, &conv_a.id, NewMessage {
                sender_id: a.patient.id,
                body: format!("a{i}"),
            })
            .unwrap();
            svc.send_message(&b.tenant.id, &conv_b.id, NewMessage {
                sender_id: b.patient.id,
                body: format!("b{i}"),
            })
            .unwrap();
        }

        // conversation.updated + 3 messages each, never the other tenant's.
        for _ in 0..4 {
            assert_eq!(next(&mut sub_a).await.payload.conversation_id(), conv_a.id);
            assert_eq!(next(&mut sub_b).await.payload.conversation_id(), conv_b.id);
        }
        svc.close();
        assert!(sub_a.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribed_client_stops_receiving() {
        let svc = service();
        let c = clinic(&svc, "North");
        let conv = conversation(&svc, &c);
        svc.open();
        let mut sub = svc
            .subscribe(SubscriptionScope::Conversation { tenant_id: c.tenant.id, conversation_id: conv.id })
            .unwrap();
        assert!(svc.unsubscribe(&sub.id));
        svc.send_message(&c.tenant.id, &conv.id, NewMessage { sender_id: c.nurse.id, body: "ping".into() })
            .unwrap();
        assert!(sub.receiver.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn typing_indicator_expires_through_dispatcher() {
        let svc = service();
        let c = clinic(&svc, "North");
        let conv = conversation(&svc, &c);
        svc.open();
        let mut sub = svc
            .subscribe(SubscriptionScope::Conversation { tenant_id: c.tenant.id, conversation_id: conv.id })
            .unwrap();

        svc.set_typing(&c.tenant.id, &conv.id, &c.nurse.id, true).unwrap();
        match next(&mut sub).await.payload {
            ChangeEvent::TypingIndicator { is_typing, user_id, .. } => {
                assert!(is_typing);
                assert_eq!(user_id, c.nurse.id);
            }
            other => panic!("unexpected {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(4)).await;
        match next(&mut sub).await.payload {
            ChangeEvent::TypingIndicator { is_typing, .. } => assert!(!is_typing),
            other => panic!("unexpected {other:?}"),
        }
        svc.close();
    }
}

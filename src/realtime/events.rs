//! Change events and the in-process event bus.
//!
//! The service layer publishes one [`ChangeEvent`] per committed write. The
//! bus is a `tokio::sync::broadcast` channel; the subscription dispatcher is
//! its only regular consumer and applies tenant filtering before anything
//! reaches a client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{ChatMessage, Conversation};

/// A committed change to chat state.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"typing_indicator","conversation_id":"…","user_id":"…","is_typing":true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    MessageInserted {
        message: ChatMessage,
    },
    MessageUpdated {
        message: ChatMessage,
    },
    TypingIndicator {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    ConversationUpdated {
        conversation: Conversation,
    },
}

impl ChangeEvent {
    /// Conversation that owns the changed record. Tenant filtering keys on it.
    pub fn conversation_id(&self) -> Uuid {
        match self {
            ChangeEvent::MessageInserted { message } | ChangeEvent::MessageUpdated { message } => {
                message.conversation_id
            }
            ChangeEvent::TypingIndicator {
                conversation_id, ..
            } => *conversation_id,
            ChangeEvent::ConversationUpdated { conversation } => conversation.id,
        }
    }

    pub fn message_id(&self) -> Option<Uuid> {
        match self {
            ChangeEvent::MessageInserted { message } | ChangeEvent::MessageUpdated { message } => {
                Some(message.id)
            }
            _ => None,
        }
    }

    /// Dot-namespaced name used in logs and envelopes.
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::MessageInserted { .. } => "message.inserted",
            ChangeEvent::MessageUpdated { .. } => "message.updated",
            ChangeEvent::TypingIndicator { .. } => "typing.indicator",
            ChangeEvent::ConversationUpdated { .. } => "conversation.updated",
        }
    }
}

/// Event plus delivery metadata, as sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: ChangeEvent,
}

impl EventEnvelope {
    pub fn new(payload: ChangeEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: payload.event_type().to_string(),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

/// Broadcast bus for change events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns the number of bus receivers it reached;
    /// with no receivers the event is dropped.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let envelope = EventEnvelope::new(event);
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            conversation_id = %envelope.payload.conversation_id(),
            receivers = self.tx.receiver_count(),
            "EventBus publish"
        );
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

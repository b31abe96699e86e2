use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(TenantKind {
    Practice => "practice",
    Hospital => "hospital",
    Clinic => "clinic",
});

str_enum!(ProviderRole {
    Surgeon => "surgeon",
    Nurse => "nurse",
    Physiotherapist => "physiotherapist",
    Admin => "admin",
});

str_enum!(TaskType {
    Form => "form",
    Exercise => "exercise",
    Video => "video",
    Message => "message",
});

str_enum!(TaskStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
});

str_enum!(ConversationStatus {
    Active => "active",
    Closed => "closed",
    Archived => "archived",
});

str_enum!(ParticipantRole {
    Provider => "provider",
    Nurse => "nurse",
    Patient => "patient",
});

impl TaskStatus {
    /// Instances only move forward; completed is terminal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::Pending, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Completed)
        )
    }
}

impl ConversationStatus {
    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        matches!(
            (self, next),
            (ConversationStatus::Active, ConversationStatus::Closed)
                | (ConversationStatus::Active, ConversationStatus::Archived)
                | (ConversationStatus::Closed, ConversationStatus::Archived)
        )
    }

    /// Messages may only be posted while the conversation is active.
    pub fn accepts_messages(&self) -> bool {
        matches!(self, ConversationStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn task_status_round_trip() {
        for (variant, s) in [
            (TaskStatus::Pending, "pending"),
            (TaskStatus::InProgress, "in_progress"),
            (TaskStatus::Completed, "completed"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(TaskStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn task_type_round_trip() {
        for (variant, s) in [
            (TaskType::Form, "form"),
            (TaskType::Exercise, "exercise"),
            (TaskType::Video, "video"),
            (TaskType::Message, "message"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(TaskType::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn serde_uses_storage_strings() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let role: ParticipantRole = serde_json::from_str("\"nurse\"").unwrap();
        assert_eq!(role, ParticipantRole::Nurse);
    }

    #[test]
    fn task_status_only_moves_forward() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn archived_conversation_is_terminal() {
        assert!(ConversationStatus::Active.can_transition_to(ConversationStatus::Closed));
        assert!(ConversationStatus::Closed.can_transition_to(ConversationStatus::Archived));
        assert!(!ConversationStatus::Archived.can_transition_to(ConversationStatus::Active));
        assert!(!ConversationStatus::Closed.can_transition_to(ConversationStatus::Active));
        assert!(!ConversationStatus::Closed.accepts_messages());
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(TaskStatus::from_str("done").is_err());
        assert!(TenantKind::from_str("").is_err());
        assert!(ProviderRole::from_str("Surgeon").is_err());
    }
}

//! Tenant isolation for change events.
//!
//! An event is forwarded only if the conversation it belongs to is owned by
//! the subscriber's tenant. Ownership is resolved through a
//! [`TenantDirectory`]; a conversation the directory does not know is never
//! forwarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::ChangeEvent;
use crate::db;

/// Resolves which tenant owns a conversation.
pub trait TenantDirectory: Send + Sync {
    fn tenant_of_conversation(&self, conversation_id: &Uuid) -> Option<Uuid>;
}

/// Fixed mapping, used by tests and tools.
impl TenantDirectory for HashMap<Uuid, Uuid> {
    fn tenant_of_conversation(&self, conversation_id: &Uuid) -> Option<Uuid> {
        self.get(conversation_id).copied()
    }
}

/// Directory backed by the `conversations` table.
///
/// A conversation never changes tenant, so positive lookups are cached for
/// the life of the process. Misses are not cached.
pub struct SqliteTenantDirectory {
    conn: Arc<Mutex<Connection>>,
    cache: Mutex<HashMap<Uuid, Uuid>>,
}

impl SqliteTenantDirectory {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the cache for a conversation created in this process.
    pub fn remember(&self, conversation_id: Uuid, tenant_id: Uuid) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(conversation_id, tenant_id);
        }
    }

    fn cached(&self, conversation_id: &Uuid) -> Option<Uuid> {
        self.cache.lock().ok()?.get(conversation_id).copied()
    }
}

impl TenantDirectory for SqliteTenantDirectory {
    fn tenant_of_conversation(&self, conversation_id: &Uuid) -> Option<Uuid> {
        if let Some(tenant) = self.cached(conversation_id) {
            return Some(tenant);
        }

        let looked_up = {
            let conn = match self.conn.lock() {
                Ok(conn) => conn,
                Err(_) => {
                    tracing::error!("Connection lock poisoned during tenant lookup");
                    return None;
                }
            };
            db::get_conversation_tenant(&conn, conversation_id)
        };

        match looked_up {
            Ok(Some(tenant)) => {
                self.remember(*conversation_id, tenant);
                Some(tenant)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Tenant lookup failed");
                None
            }
        }
    }
}

/// What a subscriber is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionScope {
    /// Every conversation of the tenant (provider inbox).
    Provider { tenant_id: Uuid, provider_id: Uuid },
    /// A single conversation.
    Conversation {
        tenant_id: Uuid,
        conversation_id: Uuid,
    },
}

impl SubscriptionScope {
    pub fn tenant_id(&self) -> Uuid {
        match self {
            SubscriptionScope::Provider { tenant_id, .. }
            | SubscriptionScope::Conversation { tenant_id, .. } => *tenant_id,
        }
    }

    /// Decide given an already-resolved owning tenant.
    pub fn admits(&self, owner: Option<Uuid>, conversation_id: Uuid) -> bool {
        let Some(owner) = owner else {
            return false;
        };
        if owner != self.tenant_id() {
            return false;
        }
        match self {
            SubscriptionScope::Provider { .. } => true,
            SubscriptionScope::Conversation {
                conversation_id: scoped,
                ..
            } => *scoped == conversation_id,
        }
    }
}

/// Whether `event` may be delivered to a subscriber with `scope`.
pub fn is_relevant(
    event: &ChangeEvent,
    scope: &SubscriptionScope,
    directory: &dyn TenantDirectory,
) -> bool {
    let conversation_id = event.conversation_id();
    scope.admits(directory.tenant_of_conversation(&conversation_id), conversation_id)
}

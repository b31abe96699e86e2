//! Subscription dispatcher: fans filtered change events out to subscribers.
//!
//! Constructed explicitly and owned by the service; nothing here is global.
//! Lifecycle:
//!
//! - `open(bus)` starts one pump task reading the bus; pending
//!   subscriptions become active
//! - `dispatch` (called by the pump) forwards each event to every active
//!   subscription whose scope admits it, in bus order
//! - `close()` stops the pump and drops every subscription
//!
//! Each subscription has its own bounded channel. A full channel drops the
//! event for that subscriber only; a dropped receiver is pruned on the next
//! dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::{EventBus, EventEnvelope};
use super::filter::{SubscriptionScope, TenantDirectory};

pub type SubscriptionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    /// Registered, waiting for the dispatcher to open.
    Subscribing,
    Active,
}

/// Receiving half handed to a subscriber.
pub struct Subscription {
    pub id: SubscriptionId,
    pub scope: SubscriptionScope,
    pub receiver: mpsc::Receiver<EventEnvelope>,
}

struct Registration {
    scope: SubscriptionScope,
    state: SubscriptionState,
    tx: mpsc::Sender<EventEnvelope>,
}

struct Pump {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Shared {
    directory: Arc<dyn TenantDirectory>,
    buffer: usize,
    registry: Mutex<HashMap<SubscriptionId, Registration>>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Registration>> {
        // Registry entries stay consistent across a panic mid-dispatch.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, envelope: &EventEnvelope) -> usize {
        let conversation_id = envelope.payload.conversation_id();
        let owner = self.directory.tenant_of_conversation(&conversation_id);
        if owner.is_none() {
            tracing::debug!(
                conversation_id = %conversation_id,
                event_type = %envelope.event_type,
                "Event for unknown conversation not forwarded"
            );
        }

        let mut delivered = 0;
        let mut registry = self.registry();
        registry.retain(|id, reg| {
            if reg.tx.is_closed() {
                tracing::debug!(subscription_id = %id, "Pruning closed subscription");
                return false;
            }
            if reg.state != SubscriptionState::Active
                || !reg.scope.admits(owner, conversation_id)
            {
                return true;
            }
            match reg.tx.try_send(envelope.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscription_id = %id,
                        event_id = %envelope.event_id,
                        "Subscriber channel full, event dropped"
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        delivered
    }
}

pub struct SubscriptionDispatcher {
    shared: Arc<Shared>,
    pump: Mutex<Option<Pump>>,
}

impl SubscriptionDispatcher {
    pub fn new(directory: Arc<dyn TenantDirectory>, buffer: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                directory,
                buffer: buffer.max(1),
                registry: Mutex::new(HashMap::new()),
            }),
            pump: Mutex::new(None),
        }
    }

    fn pump(&self) -> MutexGuard<'_, Option<Pump>> {
        self.pump.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_open(&self) -> bool {
        self.pump().is_some()
    }

    /// Start consuming `bus`. Must be called inside a tokio runtime.
    /// Opening an open dispatcher is a no-op.
    pub fn open(&self, bus: &EventBus) {
        let mut pump = self.pump();
        if pump.is_some() {
            return;
        }

        let activated = {
            let mut registry = self.shared.registry();
            let mut count = 0;
            for reg in registry.values_mut() {
                if reg.state == SubscriptionState::Subscribing {
                    reg.state = SubscriptionState::Active;
                    count += 1;
                }
            }
            count
        };

        let rx = bus.subscribe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run_pump(shared, rx, shutdown_rx));
        *pump = Some(Pump {
            shutdown: shutdown_tx,
            handle,
        });
        tracing::info!(activated, "Subscription dispatcher opened");
    }

    /// Stop the pump and drop every subscription. Receivers observe the
    /// end of their stream.
    pub fn close(&self) {
        let pump = self.pump().take();
        if let Some(pump) = pump {
            let _ = pump.shutdown.send(());
            pump.handle.abort();
        }
        let dropped = {
            let mut registry = self.shared.registry();
            let count = registry.len();
            registry.clear();
            count
        };
        tracing::info!(dropped, "Subscription dispatcher closed");
    }

    /// Register a subscription. It is `Active` immediately when the
    /// dispatcher is open, otherwise `Subscribing` until `open`.
    pub fn subscribe(&self, scope: SubscriptionScope) -> Subscription {
        // Held across the insert so a concurrent `open` cannot miss it.
        let pump = self.pump();
        let (tx, receiver) = mpsc::channel(self.shared.buffer);
        let id = Uuid::new_v4();
        let state = if pump.is_some() {
            SubscriptionState::Active
        } else {
            SubscriptionState::Subscribing
        };
        self.shared
            .registry()
            .insert(id, Registration { scope, state, tx });
        drop(pump);
        tracing::debug!(subscription_id = %id, tenant_id = %scope.tenant_id(), ?state, "Subscribed");
        Subscription {
            id,
            scope,
            receiver,
        }
    }

    /// Cancel one subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed = self.shared.registry().remove(id).is_some();
        if removed {
            tracing::debug!(subscription_id = %id, "Unsubscribed");
        }
        removed
    }

    pub fn state(&self, id: &SubscriptionId) -> SubscriptionState {
        self.shared
            .registry()
            .get(id)
            .map(|reg| reg.state)
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.registry().len()
    }

    /// Forward one event. Returns the number of subscribers it reached.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> usize {
        self.shared.dispatch(envelope)
    }
}

impl Drop for SubscriptionDispatcher {
    fn drop(&mut self) {
        if let Some(pump) = self.pump().take() {
            pump.handle.abort();
        }
    }
}

async fn run_pump(
    shared: Arc<Shared>,
    mut rx: broadcast::Receiver<EventEnvelope>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = rx.recv() => match received {
                Ok(envelope) => {
                    shared.dispatch(&envelope);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dispatcher lagged behind event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    tracing::debug!("Dispatcher pump stopped");
}

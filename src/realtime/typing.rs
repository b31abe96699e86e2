//! Typing indicators with automatic expiry.
//!
//! A user is "typing" in a conversation until they report they stopped or
//! until `expiry` passes without further activity. `TypingTracker` holds the
//! deadlines; `TypingMonitor` drives them with one tokio timer per
//! (conversation, user), re-armed on every activity, and publishes
//! `TypingIndicator { is_typing: false }` when a timer fires.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::events::{ChangeEvent, EventBus};

/// (conversation_id, user_id)
pub type TypingKey = (Uuid, Uuid);

/// Per-key typing deadlines.
#[derive(Debug)]
pub struct TypingTracker {
    expiry: Duration,
    deadlines: HashMap<TypingKey, Instant>,
}

impl TypingTracker {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            deadlines: HashMap::new(),
        }
    }

    /// Record activity at `now`, pushing the deadline out. Returns `true`
    /// if the user was not already typing.
    pub fn touch(&mut self, key: TypingKey, now: Instant) -> bool {
        self.deadlines.insert(key, now + self.expiry).is_none()
    }

    /// Explicit stop. Returns `true` if the user was typing.
    pub fn clear(&mut self, key: &TypingKey) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn is_typing(&self, key: &TypingKey) -> bool {
        self.deadlines.contains_key(key)
    }

    /// Remove and return every key whose deadline is at or before `now`.
    pub fn expire_due(&mut self, now: Instant) -> Vec<TypingKey> {
        let due: Vec<TypingKey> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &due {
            self.deadlines.remove(key);
        }
        due
    }
}

struct MonitorState {
    tracker: TypingTracker,
    timers: HashMap<TypingKey, (u64, JoinHandle<()>)>,
    generation: u64,
}

struct MonitorShared {
    bus: EventBus,
    expiry: Duration,
    state: Mutex<MonitorState>,
}

impl MonitorShared {
    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, (conversation_id, user_id): TypingKey, is_typing: bool) {
        self.bus.publish(ChangeEvent::TypingIndicator {
            conversation_id,
            user_id,
            is_typing,
        });
    }

    /// Timer callback. Stale timers (superseded by later activity) do nothing.
    fn fire(&self, key: TypingKey, generation: u64) {
        let expired = {
            let mut state = self.state();
            match state.timers.get(&key) {
                Some((current, _)) if *current == generation => {
                    state.timers.remove(&key);
                }
                _ => return,
            }
            state.tracker.expire_due(Instant::now())
        };
        for key in expired {
            tracing::debug!(conversation_id = %key.0, user_id = %key.1, "Typing indicator expired");
            self.publish(key, false);
        }
    }
}

/// Async driver for typing indicators. Cheap to clone.
#[derive(Clone)]
pub struct TypingMonitor {
    shared: Arc<MonitorShared>,
}

impl TypingMonitor {
    pub fn new(bus: EventBus, expiry: Duration) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                bus,
                expiry,
                state: Mutex::new(MonitorState {
                    tracker: TypingTracker::new(expiry),
                    timers: HashMap::new(),
                    generation: 0,
                }),
            }),
        }
    }

    /// Typing activity. Publishes `is_typing: true` when the user starts and
    /// (re)arms the expiry timer. Must be called inside a tokio runtime.
    pub fn activity(&self, conversation_id: Uuid, user_id: Uuid) {
        let key = (conversation_id, user_id);
        let started = {
            let mut state = self.shared.state();
            let started = state.tracker.touch(key, Instant::now());
            state.generation += 1;
            let generation = state.generation;

            let shared = Arc::clone(&self.shared);
            let expiry = self.shared.expiry;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(expiry).await;
                shared.fire(key, generation);
            });
            if let Some((_, previous)) = state.timers.insert(key, (generation, handle)) {
                previous.abort();
            }
            started
        };
        if started {
            self.shared.publish(key, true);
        }
    }

    /// Explicit stop. Publishes `is_typing: false` if the user was typing.
    pub fn stop(&self, conversation_id: Uuid, user_id: Uuid) {
        let key = (conversation_id, user_id);
        let was_typing = {
            let mut state = self.shared.state();
            if let Some((_, handle)) = state.timers.remove(&key) {
                handle.abort();
            }
            state.tracker.clear(&key)
        };
        if was_typing {
            self.shared.publish(key, false);
        }
    }

    pub fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.shared.state().tracker.is_typing(&(conversation_id, user_id))
    }

    /// Cancel every timer without publishing.
    pub fn shutdown(&self) {
        let mut state = self.shared.state();
        for (_, (_, handle)) in state.timers.drain() {
            handle.abort();
        }
        state.tracker = TypingTracker::new(self.shared.expiry);
    }
}

//! Idempotency guard for message delivery.
//!
//! The realtime path may deliver the same message more than once (a client
//! reconnecting after a lag, a retried publish). Consumers keep a
//! `SeenMessages` and skip ids they have already handled.

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

/// Default number of message ids remembered per consumer.
pub const DEFAULT_SEEN_CAPACITY: usize = 1024;

/// Bounded set of recently seen message ids. Oldest ids are forgotten first.
pub struct SeenMessages {
    seen: HashMap<Uuid, u64>,
    order: VecDeque<(Uuid, u64)>,
    capacity: usize,
    tick: u64,
}

impl SeenMessages {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SEEN_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            tick: 0,
        }
    }

    /// Record `message_id`. Returns `true` the first time an id is seen.
    pub fn check_and_insert(&mut self, message_id: Uuid) -> bool {
        if self.seen.contains_key(&message_id) {
            return false;
        }

        self.tick += 1;
        self.seen.insert(message_id, self.tick);
        self.order.push_back((message_id, self.tick));

        while self.seen.len() > self.capacity {
            match self.order.pop_front() {
                Some((id, tick)) => {
                    if self.seen.get(&id) == Some(&tick) {
                        self.seen.remove(&id);
                    }
                }
                None => break,
            }
        }
        true
    }

    pub fn contains(&self, message_id: &Uuid) -> bool {
        self.seen.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::new()
    }
}

//! Tenant-scoped realtime fan-out for chat.
//!
//! Writes publish [`ChangeEvent`]s on the [`EventBus`]; the
//! [`SubscriptionDispatcher`] filters each one by owning tenant (and
//! conversation, for conversation-scoped subscribers) before it reaches any
//! client channel.

pub mod dedup;
pub mod dispatcher;
pub mod events;
pub mod filter;
pub mod typing;

pub use dedup::SeenMessages;
pub use dispatcher::{Subscription, SubscriptionDispatcher, SubscriptionId, SubscriptionState};
pub use events::{ChangeEvent, EventBus, EventEnvelope};
pub use filter::{is_relevant, SqliteTenantDirectory, SubscriptionScope, TenantDirectory};
pub use typing::{TypingMonitor, TypingTracker};

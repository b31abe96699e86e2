//! Repository layer: entity-scoped database operations.
//!
//! Every function takes a borrowed `Connection`; callers own locking and
//! tenant checks. All public items are re-exported here.

mod conversation;
mod patient;
mod protocol;
mod provider;
mod task;
mod tenant;

pub use conversation::*;
pub use patient::*;
pub use protocol::*;
pub use provider::*;
pub use task::*;
pub use tenant::*;

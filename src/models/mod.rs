pub mod conversation;
pub mod enums;
pub mod patient;
pub mod protocol;
pub mod provider;
pub mod task;
pub mod tenant;

pub use conversation::*;
pub use patient::*;
pub use protocol::*;
pub use provider::*;
pub use task::*;
pub use tenant::*;

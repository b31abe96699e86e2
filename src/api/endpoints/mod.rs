//! API endpoint handlers, one module per resource.
//!
//! Handlers are thin: extract, call `CareService`, map errors.

pub mod conversations;
pub mod health;
pub mod patients;
pub mod protocols;
pub mod providers;
pub mod tasks;
pub mod tenants;

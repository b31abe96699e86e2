//! HTTP and WebSocket surface over `CareService`.
//!
//! REST routes are nested under `/api/` and scoped by the `X-Tenant-Id`
//! header; realtime chat events stream from `/ws/subscribe`.
//!
//! The router is composable: `api_router()` returns a `Router` that can be
//! mounted on any axum server instance, `start_server_on()` runs one.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;
pub mod websocket;

pub use router::api_router;
pub use server::{start_server_on, ApiServer, ServerError};
pub use types::ApiContext;

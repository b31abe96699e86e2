//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Tenant resolver: `X-Tenant-Id` → `TenantContext`, 401 otherwise
//! 2. Access logger: logs after tenant resolution, so it has the tenant id

pub mod audit;
pub mod tenant;

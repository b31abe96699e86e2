//! Shared API types: the handler context and the per-request tenant context.

use std::sync::Arc;

use uuid::Uuid;

use crate::service::CareService;

/// Shared context for all handlers and middleware. Cheap to clone.
#[derive(Clone)]
pub struct ApiContext {
    pub service: Arc<CareService>,
}

impl ApiContext {
    pub fn new(service: Arc<CareService>) -> Self {
        Self { service }
    }
}

/// Resolved tenant, injected into request extensions by the tenant
/// middleware after the `X-Tenant-Id` header was checked.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
}

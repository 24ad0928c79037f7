//! Tenant directory: the lookup interface the pool manager consumes.
//!
//! The pool manager only needs consistent reads plus a distinguished
//! "not found" classification ([`StateError::NotFound`]); every other error
//! is treated opaquely. [`StateStore`] is the bundled implementation; other
//! durable registries can implement the trait directly.

use std::future::Future;
use std::pin::Pin;

use tenantgrid_core::{Tenant, TenantStatus};

use crate::error::{StateError, StateResult};
use crate::store::StateStore;

/// Boxed future alias for directory operations.
pub type DirectoryFuture<'a, T> = Pin<Box<dyn Future<Output = StateResult<T>> + Send + 'a>>;

/// Durable registry of tenants.
pub trait TenantDirectory: Send + Sync {
    /// Look up a tenant by id. Unknown ids yield [`StateError::NotFound`].
    fn get_by_id<'a>(&'a self, id: &'a str) -> DirectoryFuture<'a, Tenant>;

    /// Look up a tenant by slug. Unknown slugs yield [`StateError::NotFound`].
    fn get_by_slug<'a>(&'a self, slug: &'a str) -> DirectoryFuture<'a, Tenant>;

    /// All tenants whose status is `active`.
    fn list_active(&self) -> DirectoryFuture<'_, Vec<Tenant>>;

    /// Every tenant regardless of status.
    fn list_all(&self) -> DirectoryFuture<'_, Vec<Tenant>>;

    /// Persist a new tenant, returning it with its assigned id.
    fn create(&self, tenant: Tenant) -> DirectoryFuture<'_, Tenant>;

    /// Change a tenant's status. Unknown ids yield [`StateError::NotFound`].
    fn update_status_by_id<'a>(
        &'a self,
        id: &'a str,
        status: TenantStatus,
    ) -> DirectoryFuture<'a, ()>;
}

impl TenantDirectory for StateStore {
    fn get_by_id<'a>(&'a self, id: &'a str) -> DirectoryFuture<'a, Tenant> {
        Box::pin(async move {
            self.get_tenant(id)?
                .ok_or_else(|| StateError::NotFound(format!("tenant {id}")))
        })
    }

    fn get_by_slug<'a>(&'a self, slug: &'a str) -> DirectoryFuture<'a, Tenant> {
        Box::pin(async move {
            self.get_tenant_by_slug(slug)?
                .ok_or_else(|| StateError::NotFound(format!("tenant slug {slug}")))
        })
    }

    fn list_active(&self) -> DirectoryFuture<'_, Vec<Tenant>> {
        Box::pin(async move { self.list_tenants_with_status(TenantStatus::Active) })
    }

    fn list_all(&self) -> DirectoryFuture<'_, Vec<Tenant>> {
        Box::pin(async move { self.list_tenants() })
    }

    fn create(&self, tenant: Tenant) -> DirectoryFuture<'_, Tenant> {
        Box::pin(async move { self.create_tenant(tenant) })
    }

    fn update_status_by_id<'a>(
        &'a self,
        id: &'a str,
        status: TenantStatus,
    ) -> DirectoryFuture<'a, ()> {
        Box::pin(async move { self.update_tenant_status(id, status).map(|_| ()) })
    }
}

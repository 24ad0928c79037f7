//! StateStore: redb-backed persistence for TenantGrid.
//!
//! Provides typed operations over tenant records and sequence counters. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use tenantgrid_core::config::DirectoryConfig;
use tenantgrid_core::{Tenant, TenantStatus, epoch_secs, validate_slug};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Open the store named by the `[directory]` section: the file at
    /// `path`, or an in-memory store when no path is set.
    pub fn open_configured(config: &DirectoryConfig) -> StateResult<Self> {
        match &config.path {
            Some(path) => Self::open(path),
            None => {
                warn!("no directory path configured, tenant state will not persist");
                Self::open_in_memory()
            }
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TENANTS).map_err(map_err!(Table))?;
        txn.open_table(TENANT_SLUGS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Register a new tenant: validates the slug, assigns a fresh id and the
    /// timestamps, and writes the record and its slug index atomically.
    pub fn create_tenant(&self, tenant: Tenant) -> StateResult<Tenant> {
        validate_slug(&tenant.slug).map_err(StateError::Invalid)?;

        let now = epoch_secs();
        let tenant = Tenant {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            ..tenant
        };
        let value = serde_json::to_vec(&tenant).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut slugs = txn.open_table(TENANT_SLUGS).map_err(map_err!(Table))?;
            if slugs.get(tenant.slug.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!("tenant slug {}", tenant.slug)));
            }
            slugs
                .insert(tenant.slug.as_str(), tenant.id.as_str())
                .map_err(map_err!(Write))?;

            let mut table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            table
                .insert(tenant.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(tenant_id = %tenant.id, slug = %tenant.slug, "tenant created");
        Ok(tenant)
    }

    /// Get a tenant by id.
    pub fn get_tenant(&self, id: &str) -> StateResult<Option<Tenant>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let tenant: Tenant =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(tenant))
            }
            None => Ok(None),
        }
    }

    /// Get a tenant by slug via the slug index.
    pub fn get_tenant_by_slug(&self, slug: &str) -> StateResult<Option<Tenant>> {
        let id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let slugs = txn.open_table(TENANT_SLUGS).map_err(map_err!(Table))?;
            match slugs.get(slug).map_err(map_err!(Read))? {
                Some(guard) => guard.value().to_string(),
                None => return Ok(None),
            }
        };
        self.get_tenant(&id)
    }

    /// List all tenants, ordered by slug.
    pub fn list_tenants(&self) -> StateResult<Vec<Tenant>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let tenant: Tenant =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(tenant);
        }
        results.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(results)
    }

    /// List tenants with the given status, ordered by slug.
    pub fn list_tenants_with_status(&self, status: TenantStatus) -> StateResult<Vec<Tenant>> {
        let mut tenants = self.list_tenants()?;
        tenants.retain(|t| t.status == status);
        Ok(tenants)
    }

    /// Change a tenant's status and bump `updated_at`. Tenants are never
    /// physically removed; `Deleted` is a status like any other.
    pub fn update_tenant_status(&self, id: &str, status: TenantStatus) -> StateResult<Tenant> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            let mut tenant: Tenant = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("tenant {id}"))),
            };
            tenant.status = status;
            tenant.updated_at = epoch_secs();
            let value = serde_json::to_vec(&tenant).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = tenant;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(tenant_id = %id, %status, "tenant status updated");
        Ok(updated)
    }

    // ── Sequences ──────────────────────────────────────────────────

    /// Insert-or-add: add `by` to the counter (absent counts as 0) and return
    /// the new value. Atomic with respect to other writers.
    pub fn increment_sequence(&self, key: &str, by: u64) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let current = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            next = current
                .checked_add(by)
                .ok_or_else(|| StateError::Overflow(format!("sequence {key}")))?;
            table.insert(key, next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    /// Overwrite a counter with an explicit value.
    pub fn set_sequence(&self, key: &str, value: u64) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, value, "sequence overridden");
        Ok(())
    }

    /// Current counter value; 0 when the sequence has never been used.
    pub fn get_sequence(&self, key: &str) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        Ok(table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0))
    }
}

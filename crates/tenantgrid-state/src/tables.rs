//! redb table definitions for the TenantGrid state store.

use redb::TableDefinition;

/// Tenant records (JSON) keyed by `{tenant_id}`.
pub const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenants");

/// Slug index: `{slug}` → `{tenant_id}`.
pub const TENANT_SLUGS: TableDefinition<&str, &str> = TableDefinition::new("tenant_slugs");

/// Sequence counters keyed by `{tenant_id}/{prefix}/{period}`.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

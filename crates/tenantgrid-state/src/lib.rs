//! tenantgrid-state: durable state for TenantGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the tenant directory and for document sequence counters.
//!
//! # Architecture
//!
//! Tenant records are JSON-serialized into the `tenants` table keyed by id,
//! with a `tenant_slugs` index (slug → id) enforcing slug uniqueness.
//! Sequence counters live in `sequences` as plain `u64` values keyed by
//! `{tenant_id}/{prefix}/{period}`.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and implements [`TenantDirectory`], the lookup interface the pool manager
//! consumes.

pub mod directory;
pub mod error;
pub mod store;
pub mod tables;

pub use directory::{DirectoryFuture, TenantDirectory};
pub use error::{StateError, StateResult};
pub use store::StateStore;

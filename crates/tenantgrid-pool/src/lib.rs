//! tenantgrid-pool: per-tenant connection pool lifecycle management.
//!
//! Every tenant owns a physically isolated database. The [`PoolManager`]
//! lazily opens one connection pool per tenant, shares it between requests,
//! and retires it when it goes idle, fails health checks, or the tenant is
//! suspended.
//!
//! # Architecture
//!
//! ```text
//! Request resolves tenant id
//!   → PoolManager::get_pool / lease(tenant_id)
//!     → Pool exists       → touch last_used → return it
//!     → No pool exists    → ceiling check → directory lookup → status gate
//!                         → build DSN → open + ping (bounded)
//!                         → insert-if-absent (loser closes its own pool)
//!
//! Background (one shutdown signal, both joined on close):
//!   eviction loop     every idle_timeout/2   → close idle or unhealthy pools
//!   health-check loop every health period    → ping all, mark/close failures
//! ```
//!
//! Physical pools are opened through a [`PoolOpener`]. [`PgPoolOpener`]
//! (sqlx) is used in production; [`MemoryOpener`] never touches the network
//! and exposes counters for tests.

pub mod backend;
pub mod config;
pub mod dsn;
pub mod error;
pub mod lease;
pub mod managed;
pub mod manager;
pub mod memory;
pub mod postgres;
pub mod stats;

pub use backend::{BoxFuture, ConnectionStats, OpenError, PhysicalPool, PoolOpener};
pub use config::{ManagerConfig, PoolSettings};
pub use dsn::{SslMode, build_dsn, build_dsn_with_ssl, redact_dsn};
pub use error::{PoolError, PoolResult, Stage};
pub use lease::PoolLease;
pub use managed::ManagedPool;
pub use manager::{HEALTH_PING_TIMEOUT, HealthSweep, PoolManager};
pub use memory::{MemoryOpener, MemoryPool, PingBehavior};
pub use postgres::{PgPhysicalPool, PgPoolOpener};
pub use stats::{ManagerStats, TenantPoolStats};

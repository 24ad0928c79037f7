//! tenantgrid-core: shared types and configuration for TenantGrid.
//!
//! - **types**: the `Tenant` record with its status and plan enums
//! - **config**: `tenantgrid.toml` parsing and duration strings
//! - **logging**: `tracing-subscriber` initialisation from `[logging]`

pub mod config;
pub mod logging;
pub mod types;

pub use config::{GridConfig, parse_duration};
pub use types::*;

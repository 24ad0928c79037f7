//! tenantgrid-numbering: formatted document numbers per tenant.
//!
//! Numbers look like `INV-2024-00042`: a prefix, an optional period segment
//! (`YYYY` or `YYYY-MM`, depending on the reset period) and a zero-padded
//! counter. Counters live in a [`CounterStore`]; the [`NumberingService`]
//! either hits the store on every call ([`Strategy::Strict`]) or reserves
//! ranges and serves them from memory ([`Strategy::Cached`]).
//!
//! One service instance may serve every tenant. Every key, in the range
//! cache and in storage, is scoped by tenant id.

pub mod error;
pub mod postgres;
pub mod sequence;
pub mod service;
pub mod store;

pub use error::{NumberingError, NumberingResult};
pub use postgres::PgSequenceStore;
pub use sequence::{ResetPeriod, SequenceConfig, SequenceKey, format_number};
pub use service::{NumberingService, Strategy};
pub use store::{CounterFuture, CounterStore};

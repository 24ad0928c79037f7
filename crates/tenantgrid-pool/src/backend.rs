//! Physical pool abstraction.
//!
//! The manager never talks to a database driver directly. A [`PoolOpener`]
//! turns a DSN plus [`PoolSettings`] into a [`PhysicalPool`], which the
//! manager pings, closes and asks for connection counts. Traits return boxed
//! futures so they stay object-safe without an async-trait macro.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use thiserror::Error;

use crate::config::PoolSettings;

/// Boxed, `Send` future used by the backend traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Connection counts reported by a physical pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub total: u32,
    pub idle: u32,
    pub acquired: u32,
}

#[derive(Debug, Error)]
pub enum OpenError {
    /// The DSN could not be turned into connection options.
    #[error("invalid connection string: {0}")]
    InvalidDsn(String),

    /// The driver could not establish the pool.
    #[error("{0}")]
    Connect(String),
}

/// An open connection pool to one tenant database.
pub trait PhysicalPool: Send + Sync + 'static {
    /// Round-trip a trivial query. The error is a human-readable message.
    fn ping(&self) -> BoxFuture<'_, Result<(), String>>;

    /// Close every connection. Callers guarantee this runs at most once.
    fn close(&self) -> BoxFuture<'_, ()>;

    fn connection_stats(&self) -> ConnectionStats;
}

/// Opens physical pools.
pub trait PoolOpener: Send + Sync + 'static {
    type Pool: PhysicalPool;

    fn open<'a>(
        &'a self,
        dsn: &'a str,
        settings: &'a PoolSettings,
    ) -> BoxFuture<'a, Result<Self::Pool, OpenError>>;
}

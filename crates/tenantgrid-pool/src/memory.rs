//! In-memory [`PoolOpener`] that never touches the network.
//!
//! Every pool it opens shares counters with the opener, so tests can assert
//! how many pools were opened, closed and pinged. Ping behaviour is
//! controlled per database name, which is how tests make one tenant fail
//! while others stay healthy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::backend::{BoxFuture, ConnectionStats, OpenError, PhysicalPool, PoolOpener};
use crate::config::PoolSettings;

/// How pings to a database behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PingBehavior {
    #[default]
    Healthy = 0,
    Failing = 1,
    /// Never completes; the caller's timeout has to fire.
    Hanging = 2,
}

impl PingBehavior {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PingBehavior::Failing,
            2 => PingBehavior::Hanging,
            _ => PingBehavior::Healthy,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    opened: AtomicUsize,
    closed: AtomicUsize,
    pings: AtomicUsize,
    fail_open: AtomicBool,
    open_delay_ms: AtomicU64,
    behaviors: DashMap<String, Arc<AtomicU8>>,
}

impl Shared {
    fn behavior(&self, database: &str) -> Arc<AtomicU8> {
        Arc::clone(
            self.behaviors
                .entry(database.to_string())
                .or_insert_with(|| Arc::new(AtomicU8::new(PingBehavior::Healthy as u8)))
                .value(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    shared: Arc<Shared>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open` fail with a connect error.
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every `open`.
    pub fn set_open_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.shared.open_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Set ping behaviour for a database, including pools already open.
    pub fn set_ping(&self, database: &str, behavior: PingBehavior) {
        self.shared
            .behavior(database)
            .store(behavior as u8, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    /// Pools opened and not yet closed.
    pub fn live_count(&self) -> usize {
        self.open_count().saturating_sub(self.close_count())
    }
}

impl PoolOpener for MemoryOpener {
    type Pool = MemoryPool;

    fn open<'a>(
        &'a self,
        dsn: &'a str,
        settings: &'a PoolSettings,
    ) -> BoxFuture<'a, Result<MemoryPool, OpenError>> {
        Box::pin(async move {
            let database = database_from_dsn(dsn)
                .ok_or_else(|| OpenError::InvalidDsn(format!("no database in '{dsn}'")))?;

            let delay = self.shared.open_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.shared.fail_open.load(Ordering::SeqCst) {
                return Err(OpenError::Connect("connection refused".to_string()));
            }

            self.shared.opened.fetch_add(1, Ordering::SeqCst);
            Ok(MemoryPool {
                database: database.to_string(),
                connections: settings.min_connections,
                behavior: self.shared.behavior(database),
                shared: Arc::clone(&self.shared),
                closed: AtomicBool::new(false),
            })
        })
    }
}

#[derive(Debug)]
pub struct MemoryPool {
    database: String,
    connections: u32,
    behavior: Arc<AtomicU8>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemoryPool {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PhysicalPool for MemoryPool {
    fn ping(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            self.shared.pings.fetch_add(1, Ordering::SeqCst);
            if self.is_closed() {
                return Err("pool is closed".to_string());
            }
            match PingBehavior::from_u8(self.behavior.load(Ordering::SeqCst)) {
                PingBehavior::Healthy => Ok(()),
                PingBehavior::Failing => Err(format!("database {} unreachable", self.database)),
                PingBehavior::Hanging => std::future::pending().await,
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.shared.closed.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    fn connection_stats(&self) -> ConnectionStats {
        let total = if self.is_closed() { 0 } else { self.connections };
        ConnectionStats {
            total,
            idle: total,
            acquired: 0,
        }
    }
}

/// Database name: the path segment between the authority and the query.
fn database_from_dsn(dsn: &str) -> Option<&str> {
    let rest = &dsn[dsn.find("://")? + 3..];
    let path = &rest[rest.find('/')? + 1..];
    let name = path.split('?').next().unwrap_or_default();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PoolSettings {
        PoolSettings {
            max_connections: 4,
            min_connections: 2,
            connect_timeout: Duration::from_secs(1),
            health_check_period: Duration::ZERO,
        }
    }

    #[test]
    fn database_name_extraction() {
        assert_eq!(
            database_from_dsn("postgres://u:p@h:5432/acme_db?sslmode=disable"),
            Some("acme_db")
        );
        assert_eq!(database_from_dsn("postgres://u:p@h:5432/"), None);
        assert_eq!(database_from_dsn("acme_db"), None);
    }

    #[tokio::test]
    async fn ping_follows_behavior_per_database() {
        let opener = MemoryOpener::new();
        let settings = settings();
        let a = opener.open("postgres://u:p@h:1/a", &settings).await.unwrap();
        let b = opener.open("postgres://u:p@h:1/b", &settings).await.unwrap();

        opener.set_ping("a", PingBehavior::Failing);
        assert!(a.ping().await.is_err());
        assert!(b.ping().await.is_ok());

        opener.set_ping("a", PingBehavior::Healthy);
        assert!(a.ping().await.is_ok());
        assert_eq!(opener.ping_count(), 3);
    }

    #[tokio::test]
    async fn close_is_counted_once() {
        let opener = MemoryOpener::new();
        let pool = opener.open("postgres://u:p@h:1/a", &settings()).await.unwrap();
        assert_eq!(pool.connection_stats().total, 2);

        pool.close().await;
        pool.close().await;
        assert_eq!(opener.close_count(), 1);
        assert_eq!(opener.live_count(), 0);
        assert!(pool.ping().await.is_err());
        assert_eq!(pool.connection_stats().total, 0);
    }

    #[tokio::test]
    async fn open_can_be_made_to_fail() {
        let opener = MemoryOpener::new();
        opener.set_fail_open(true);
        let err = opener.open("postgres://u:p@h:1/a", &settings()).await.unwrap_err();
        assert!(matches!(err, OpenError::Connect(_)));
        assert_eq!(opener.open_count(), 0);

        let err = opener.open("nonsense", &settings()).await.unwrap_err();
        assert!(matches!(err, OpenError::InvalidDsn(_)));
    }
}

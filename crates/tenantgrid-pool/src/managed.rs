//! One tenant's pool plus the bookkeeping the manager needs to decide when
//! it may be destroyed.
//!
//! Timestamps are stored as nanoseconds since the manager's epoch in
//! atomics, so the hot path never takes a lock. `unhealthy_since` uses 0 as
//! the "healthy" sentinel; real marks are clamped to at least 1.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tenantgrid_core::Tenant;
use tokio::time::Instant;
use tracing::warn;

use crate::backend::{ConnectionStats, PhysicalPool};

pub struct ManagedPool<P> {
    pool: P,
    tenant: Tenant,
    epoch: Instant,
    created_nanos: u64,
    last_used_nanos: AtomicU64,
    active_refs: AtomicUsize,
    unhealthy_since_nanos: AtomicU64,
    closed: AtomicBool,
}

impl<P: PhysicalPool> ManagedPool<P> {
    pub(crate) fn new(pool: P, tenant: Tenant, epoch: Instant) -> Self {
        let now = nanos_since(epoch);
        Self {
            pool,
            tenant,
            epoch,
            created_nanos: now,
            last_used_nanos: AtomicU64::new(now),
            active_refs: AtomicUsize::new(0),
            unhealthy_since_nanos: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// The physical pool, for running queries.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Snapshot of the tenant taken when the pool was created.
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant.id
    }

    pub fn touch(&self) {
        self.last_used_nanos
            .fetch_max(nanos_since(self.epoch), Ordering::Relaxed);
    }

    /// Mark the pool as in use. Every call must be paired with
    /// [`release_ref`](Self::release_ref); prefer
    /// [`PoolManager::lease`](crate::PoolManager::lease).
    pub fn acquire_ref(&self) {
        self.active_refs.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    pub fn release_ref(&self) {
        let released = self
            .active_refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if released.is_err() {
            warn!(tenant_id = %self.tenant.id, "release_ref without matching acquire_ref");
        }
        self.touch();
    }

    pub fn active_refs(&self) -> usize {
        self.active_refs.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.created_nanos)
    }

    pub fn last_used(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.last_used_nanos.load(Ordering::Relaxed))
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_used())
    }

    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy_since_nanos.load(Ordering::Acquire) != 0
    }

    pub fn unhealthy_since(&self) -> Option<Instant> {
        match self.unhealthy_since_nanos.load(Ordering::Acquire) {
            0 => None,
            n => Some(self.epoch + Duration::from_nanos(n)),
        }
    }

    /// Record a failed health check. Returns `true` only for the first
    /// failure of a streak; later failures keep the original timestamp.
    pub(crate) fn mark_unhealthy(&self) -> bool {
        let now = nanos_since(self.epoch).max(1);
        self.unhealthy_since_nanos
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clear the unhealthy mark. Returns `true` if the pool had been marked.
    pub(crate) fn mark_healthy(&self) -> bool {
        self.unhealthy_since_nanos.swap(0, Ordering::AcqRel) != 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the physical pool. Only the first call does any work.
    pub(crate) async fn close_physical(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.pool.close().await;
        true
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.pool.connection_stats()
    }
}

impl<P> fmt::Debug for ManagedPool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedPool")
            .field("tenant_id", &self.tenant.id)
            .field("active_refs", &self.active_refs.load(Ordering::Relaxed))
            .field(
                "unhealthy",
                &(self.unhealthy_since_nanos.load(Ordering::Relaxed) != 0),
            )
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn nanos_since(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryOpener;
    use crate::PoolOpener;
    use crate::config::ManagerConfig;

    async fn managed() -> (MemoryOpener, ManagedPool<crate::memory::MemoryPool>) {
        let opener = MemoryOpener::new();
        let settings = ManagerConfig::new("app", "pw").pool_settings();
        let pool = opener
            .open("postgres://app:pw@h:5432/acme_db", &settings)
            .await
            .unwrap();
        let tenant = Tenant::new("acme", "Acme", "h", 5432, "acme_db");
        (opener, ManagedPool::new(pool, tenant, Instant::now()))
    }

    #[tokio::test(start_paused = true)]
    async fn refs_touch_last_used() {
        let (_opener, pool) = managed().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(pool.idle_for(), Duration::from_secs(30));

        pool.acquire_ref();
        assert_eq!(pool.active_refs(), 1);
        assert_eq!(pool.idle_for(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(5)).await;
        pool.release_ref();
        assert_eq!(pool.active_refs(), 0);
        assert_eq!(pool.idle_for(), Duration::ZERO);
    }

    #[tokio::test]
    async fn release_without_acquire_does_not_underflow() {
        let (_opener, pool) = managed().await;
        pool.release_ref();
        assert_eq!(pool.active_refs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_keeps_first_failure_time() {
        let (_opener, pool) = managed().await;
        assert!(!pool.is_unhealthy());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(pool.mark_unhealthy());
        let first = pool.unhealthy_since().unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!pool.mark_unhealthy());
        assert_eq!(pool.unhealthy_since(), Some(first));

        assert!(pool.mark_healthy());
        assert!(!pool.is_unhealthy());
        assert!(!pool.mark_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_at_epoch_is_still_recorded() {
        let (_opener, pool) = managed().await;
        assert!(pool.mark_unhealthy());
        assert!(pool.is_unhealthy());
    }

    #[tokio::test]
    async fn physical_close_happens_once() {
        let (opener, pool) = managed().await;
        assert!(pool.close_physical().await);
        assert!(!pool.close_physical().await);
        assert!(pool.is_closed());
        assert_eq!(opener.close_count(), 1);
    }
}

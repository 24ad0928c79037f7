//! Per-tenant pool manager.
//!
//! One [`ManagedPool`] per tenant, created lazily on first use and kept in a
//! lock-striped map. Two background loops retire pools: the eviction loop
//! closes pools that are idle or marked unhealthy, and the health-check loop
//! pings every pool and marks failures. Neither loop ever closes a pool that
//! holds an active reference; only [`PoolManager::retire_tenant`] and
//! [`PoolManager::close`] do that.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tenantgrid_core::{Tenant, TenantId, TenantStatus};
use tenantgrid_state::TenantDirectory;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, timeout};

use crate::backend::{OpenError, PhysicalPool, PoolOpener};
use crate::config::ManagerConfig;
use crate::dsn::{build_dsn_with_ssl, redact_dsn};
use crate::error::{PoolError, PoolResult, Stage};
use crate::lease::PoolLease;
use crate::managed::ManagedPool;
use crate::stats::{ManagerStats, TenantPoolStats};

/// Upper bound on a single health-check ping.
pub const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while [`PoolManager::drain`] waits for leases to end.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

type PoolMap<P> = DashMap<TenantId, Arc<ManagedPool<P>>>;

/// Outcome of one health-check sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSweep {
    pub checked: usize,
    pub failed: usize,
    pub recovered: usize,
    pub closed: usize,
}

pub struct PoolManager<O: PoolOpener> {
    inner: Arc<Inner<O>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

struct Inner<O: PoolOpener> {
    config: ManagerConfig,
    directory: Arc<dyn TenantDirectory>,
    opener: O,
    pools: PoolMap<O::Pool>,
    pool_count: AtomicUsize,
    epoch: Instant,
    /// Set by `drain` and `close`; rejects new pools and leases.
    shutting_down: AtomicBool,
    closed: AtomicBool,
}

impl<O: PoolOpener> PoolManager<O> {
    /// Create a manager. Background loops do not run until
    /// [`start`](Self::start) is called.
    pub fn new(
        config: ManagerConfig,
        directory: Arc<dyn TenantDirectory>,
        opener: O,
    ) -> PoolResult<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                directory,
                opener,
                pools: DashMap::new(),
                pool_count: AtomicUsize::new(0),
                epoch: Instant::now(),
                shutting_down: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn opener(&self) -> &O {
        &self.inner.opener
    }

    /// Spawn the eviction and health-check loops. Each runs only if its
    /// period is nonzero. Calling this more than once, or after
    /// [`close`](Self::close), does nothing.
    pub async fn start(&self) {
        // `close` flips the flag and signals while holding this lock, so a
        // loop spawned here has always subscribed before the signal.
        let mut tasks = self.tasks.lock().await;
        if self.inner.shutting_down.load(Ordering::Acquire)
            || self.started.swap(true, Ordering::AcqRel)
        {
            return;
        }

        if let Some(period) = self.inner.config.eviction_interval() {
            let inner = Arc::clone(&self.inner);
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(eviction_loop(inner, period, shutdown)));
        }
        if let Some(period) = self.inner.config.health_check_interval() {
            let inner = Arc::clone(&self.inner);
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(health_check_loop(inner, period, shutdown)));
        }

        tracing::info!(
            loops = tasks.len(),
            idle_timeout = ?self.inner.config.pool_idle_timeout,
            health_check_period = ?self.inner.config.health_check_period,
            max_total_pools = self.inner.config.max_total_pools,
            "pool manager started"
        );
    }

    /// Return the tenant's pool, creating it on first use.
    ///
    /// The returned pool carries no reference; callers that hold it across
    /// awaits should use [`lease`](Self::lease) instead so it cannot be
    /// evicted underneath them.
    pub async fn get_pool(&self, tenant_id: &str) -> PoolResult<Arc<ManagedPool<O::Pool>>> {
        self.inner.get_pool(tenant_id).await
    }

    /// Return the tenant's pool with one active reference held until the
    /// lease is dropped.
    pub async fn lease(&self, tenant_id: &str) -> PoolResult<PoolLease<O::Pool>> {
        loop {
            self.inner.ensure_open()?;
            if let Some(lease) = self.inner.try_lease(tenant_id) {
                return Ok(lease);
            }
            let created = self.inner.create_pool(tenant_id).await?;
            // The reference is only taken under the shard guard, so a pool
            // that was evicted in between is never handed out.
            if let Some(lease) = self.inner.try_lease_exact(tenant_id, &created) {
                return Ok(lease);
            }
            tracing::debug!(tenant_id, "pool replaced before lease, retrying");
        }
    }

    /// Close pools that are unreferenced and either unhealthy or idle past
    /// the idle timeout. Returns the number closed.
    pub async fn evict_idle_pools(&self) -> usize {
        self.inner.evict_idle_pools().await
    }

    /// Ping every pool concurrently.
    pub async fn check_pools_health(&self) -> HealthSweep {
        self.inner.check_pools_health().await
    }

    /// Close the tenant's pool regardless of active references.
    pub async fn retire_tenant(&self, tenant_id: &str, reason: &str) -> bool {
        self.inner.retire_tenant(tenant_id, reason).await
    }

    /// Change the tenant's status in the directory. A tenant that is no
    /// longer active loses its pool, so the next lookup sees the new status.
    pub async fn update_tenant_status(&self, tenant_id: &str, status: TenantStatus) -> PoolResult<()> {
        self.inner
            .directory
            .update_status_by_id(tenant_id, status)
            .await
            .map_err(|e| PoolError::from_lookup(tenant_id, e))?;
        tracing::info!(tenant_id, %status, "tenant status updated");

        if !status.is_active() {
            self.inner
                .retire_tenant(tenant_id, &format!("tenant {status}"))
                .await;
        }
        Ok(())
    }

    /// Open a pool for every active tenant concurrently. Returns the number
    /// of pools now open for them, or the first error after all attempts
    /// have finished.
    pub async fn prewarm_pools(&self) -> PoolResult<usize> {
        let tenants = self
            .inner
            .directory
            .list_active()
            .await
            .map_err(PoolError::DirectoryList)?;
        let started = Instant::now();

        let mut attempts = JoinSet::new();
        for tenant in tenants {
            let inner = Arc::clone(&self.inner);
            attempts.spawn(async move {
                let result = inner.get_pool(&tenant.id).await.map(|_| ());
                (tenant.id, result)
            });
        }

        let mut warmed = 0;
        let mut errors = Vec::new();
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((_, Ok(()))) => warmed += 1,
                Ok((tenant_id, Err(e))) => {
                    tracing::warn!(tenant_id = %tenant_id, error = %e, "pool prewarm failed");
                    errors.push(e);
                }
                Err(e) => errors.push(PoolError::Task(e.to_string())),
            }
        }

        let failed = errors.len();
        if let Some(first) = errors.into_iter().next() {
            tracing::warn!(warmed, failed, "pool prewarm finished with failures");
            return Err(first);
        }
        tracing::info!(warmed, elapsed = ?started.elapsed(), "pool prewarm complete");
        Ok(warmed)
    }

    /// Stop accepting work, wait up to `timeout` for every lease to end,
    /// then [`close`](Self::close). Returns the number of pools that still
    /// held references when they were force-closed.
    pub async fn drain(&self, timeout: Duration) -> usize {
        self.inner.shutting_down.store(true, Ordering::Release);
        tracing::info!(drain_timeout = ?timeout, "pool manager draining started");

        let deadline = Instant::now() + timeout;
        loop {
            let referenced = self.inner.referenced_pools();
            if referenced == 0 {
                tracing::info!("all tenant pools released");
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    remaining = referenced,
                    "drain timeout expired, force-closing referenced pools"
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let force_closed = self.inner.referenced_pools();
        self.close().await;
        force_closed
    }

    /// Stop both loops, wait for them to exit, then close every remaining
    /// pool regardless of references. Idempotent.
    pub async fn close(&self) {
        let handles = {
            let mut tasks = self.tasks.lock().await;
            self.inner.shutting_down.store(true, Ordering::Release);
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            let _ = self.shutdown_tx.send(true);
            std::mem::take(&mut *tasks)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "pool manager background task ended abnormally");
            }
        }

        let mut closed = 0;
        for (tenant_id, pool) in self.inner.snapshot() {
            let refs = pool.active_refs();
            if refs > 0 {
                tracing::warn!(tenant_id = %tenant_id, active_refs = refs, "closing pool with active references");
            }
            if self.inner.close_pool(&tenant_id, &pool, "shutdown").await {
                closed += 1;
            }
        }
        tracing::info!(closed, "pool manager shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Number of pools currently tracked, plus creations that hold a slot
    /// under the ceiling.
    pub fn pool_count(&self) -> usize {
        self.inner.pool_count.load(Ordering::Acquire)
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.inner.pools.contains_key(tenant_id)
    }

    pub fn stats(&self) -> ManagerStats {
        let tenants = self
            .inner
            .snapshot()
            .into_iter()
            .map(|(tenant_id, pool)| TenantPoolStats {
                slug: pool.tenant().slug.clone(),
                connections: pool.connection_stats(),
                active_refs: pool.active_refs(),
                idle_ms: u64::try_from(pool.idle_for().as_millis()).unwrap_or(u64::MAX),
                healthy: !pool.is_unhealthy(),
                tenant_id,
            })
            .collect();
        ManagerStats::from_tenants(tenants)
    }

    /// Log one line per tenant pool plus a summary.
    pub fn log_stats(&self) {
        let stats = self.stats();
        for t in &stats.tenants {
            tracing::info!(
                tenant_id = %t.tenant_id,
                slug = %t.slug,
                total = t.connections.total,
                idle = t.connections.idle,
                acquired = t.connections.acquired,
                active_refs = t.active_refs,
                idle_ms = t.idle_ms,
                healthy = t.healthy,
                "tenant pool statistics"
            );
        }
        tracing::info!(
            total_pools = stats.total_pools,
            total_connections = stats.total_connections,
            acquired_connections = stats.acquired_connections,
            unhealthy_pools = stats.unhealthy_pools(),
            "pool manager statistics"
        );
    }
}

impl<O: PoolOpener> Inner<O> {
    fn ensure_open(&self) -> PoolResult<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            Err(PoolError::Closed)
        } else {
            Ok(())
        }
    }

    async fn get_pool(&self, tenant_id: &str) -> PoolResult<Arc<ManagedPool<O::Pool>>> {
        self.ensure_open()?;
        if let Some(pool) = self.pools.get(tenant_id) {
            pool.touch();
            tracing::debug!(tenant_id, "tenant pool cache hit");
            return Ok(Arc::clone(pool.value()));
        }
        self.create_pool(tenant_id).await
    }

    fn try_lease(&self, tenant_id: &str) -> Option<PoolLease<O::Pool>> {
        let pool = self.pools.get(tenant_id)?;
        pool.acquire_ref();
        Some(PoolLease::new(Arc::clone(pool.value())))
    }

    fn try_lease_exact(
        &self,
        tenant_id: &str,
        expected: &Arc<ManagedPool<O::Pool>>,
    ) -> Option<PoolLease<O::Pool>> {
        let pool = self.pools.get(tenant_id)?;
        if !Arc::ptr_eq(pool.value(), expected) {
            return None;
        }
        pool.acquire_ref();
        Some(PoolLease::new(Arc::clone(pool.value())))
    }

    /// Reserve a slot under the ceiling before any I/O. The slot stays
    /// counted once the pool is inserted and is released on every other
    /// outcome, so in-flight creations can never push the total past
    /// `max_total_pools`.
    async fn create_pool(&self, tenant_id: &str) -> PoolResult<Arc<ManagedPool<O::Pool>>> {
        let limit = self.config.max_total_pools;
        let reserved = self
            .pool_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (limit == 0 || n < limit).then_some(n + 1)
            });
        if reserved.is_err() {
            tracing::warn!(tenant_id, limit, "tenant pool limit reached");
            return Err(PoolError::MaxPoolLimit { limit });
        }

        let (physical, tenant, started) = match self.open_tenant_pool(tenant_id).await {
            Ok(opened) => opened,
            Err(e) => {
                self.pool_count.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
        };

        let managed = Arc::new(ManagedPool::new(physical, tenant, self.epoch));
        let winner = match self.pools.entry(tenant_id.to_string()) {
            Entry::Occupied(existing) => Some(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&managed));
                None
            }
        };

        if let Some(winner) = winner {
            tracing::debug!(tenant_id, "lost pool creation race, closing duplicate");
            self.pool_count.fetch_sub(1, Ordering::AcqRel);
            managed.close_physical().await;
            winner.touch();
            return Ok(winner);
        }

        if self.shutting_down.load(Ordering::Acquire) {
            self.close_pool(tenant_id, &managed, "created during shutdown")
                .await;
            return Err(PoolError::Closed);
        }

        tracing::info!(
            tenant_id,
            slug = %managed.tenant().slug,
            total_pools = self.pool_count.load(Ordering::Acquire),
            elapsed = ?started.elapsed(),
            "tenant pool created"
        );
        Ok(managed)
    }

    /// Look up the tenant, then open and ping its physical pool.
    async fn open_tenant_pool(&self, tenant_id: &str) -> PoolResult<(O::Pool, Tenant, Instant)> {
        let tenant = self
            .directory
            .get_by_id(tenant_id)
            .await
            .map_err(|e| PoolError::from_lookup(tenant_id, e))?;
        if !tenant.is_active() {
            return Err(PoolError::TenantNotActive {
                tenant_id: tenant_id.to_string(),
                status: tenant.status,
            });
        }

        let started = Instant::now();
        let dsn = build_dsn_with_ssl(
            &tenant,
            &self.config.db_user,
            &self.config.db_password,
            self.config.ssl_mode,
        );
        let settings = self.config.pool_settings();
        let connect_timeout = self.config.connect_timeout;
        tracing::debug!(tenant_id, dsn = %redact_dsn(&dsn), "opening tenant pool");

        let physical = match timeout(connect_timeout, self.opener.open(&dsn, &settings)).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(OpenError::InvalidDsn(message))) => {
                return Err(PoolError::infrastructure(tenant_id, Stage::ParseDsn, message));
            }
            Ok(Err(OpenError::Connect(message))) => {
                return Err(PoolError::infrastructure(tenant_id, Stage::Open, message));
            }
            Err(_) => {
                return Err(PoolError::infrastructure(
                    tenant_id,
                    Stage::Open,
                    format!("timed out after {connect_timeout:?}"),
                ));
            }
        };

        let ping = timeout(connect_timeout, physical.ping())
            .await
            .unwrap_or_else(|_| Err(format!("timed out after {connect_timeout:?}")));
        if let Err(message) = ping {
            physical.close().await;
            return Err(PoolError::infrastructure(tenant_id, Stage::Ping, message));
        }
        Ok((physical, tenant, started))
    }

    /// Remove `pool` if the map still holds exactly it, then close it.
    async fn close_pool(&self, tenant_id: &str, pool: &Arc<ManagedPool<O::Pool>>, reason: &str) -> bool {
        let removed = self
            .pools
            .remove_if(tenant_id, |_, current| Arc::ptr_eq(current, pool))
            .is_some();
        self.finish_close(tenant_id, pool, removed, reason).await
    }

    /// As [`close_pool`](Self::close_pool), but only while the pool has no
    /// active references. The check runs under the shard write lock, which
    /// leases also hold while taking their reference.
    async fn close_pool_if_unreferenced(
        &self,
        tenant_id: &str,
        pool: &Arc<ManagedPool<O::Pool>>,
        reason: &str,
    ) -> bool {
        let removed = self
            .pools
            .remove_if(tenant_id, |_, current| {
                Arc::ptr_eq(current, pool) && current.active_refs() == 0
            })
            .is_some();
        self.finish_close(tenant_id, pool, removed, reason).await
    }

    async fn finish_close(
        &self,
        tenant_id: &str,
        pool: &Arc<ManagedPool<O::Pool>>,
        removed: bool,
        reason: &str,
    ) -> bool {
        if !removed {
            return false;
        }
        let remaining = self.pool_count.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        pool.close_physical().await;
        tracing::info!(tenant_id, reason, remaining_pools = remaining, "tenant pool closed");
        true
    }

    async fn retire_tenant(&self, tenant_id: &str, reason: &str) -> bool {
        let Some(pool) = self.pools.get(tenant_id).map(|p| Arc::clone(p.value())) else {
            return false;
        };
        self.close_pool(tenant_id, &pool, reason).await
    }

    async fn evict_idle_pools(&self) -> usize {
        let idle_timeout = self.config.pool_idle_timeout;
        let mut evicted = 0;

        for (tenant_id, pool) in self.snapshot() {
            if pool.active_refs() > 0 {
                continue;
            }
            let reason = if pool.is_unhealthy() {
                "unhealthy"
            } else if !idle_timeout.is_zero() && pool.idle_for() > idle_timeout {
                "idle timeout"
            } else {
                continue;
            };
            if self.close_pool_if_unreferenced(&tenant_id, &pool, reason).await {
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::info!(
                evicted,
                remaining_pools = self.pool_count.load(Ordering::Acquire),
                "evicted tenant pools"
            );
        }
        evicted
    }

    async fn check_pools_health(&self) -> HealthSweep {
        let mut sweep = HealthSweep::default();
        let mut probes = JoinSet::new();

        for (tenant_id, pool) in self.snapshot() {
            probes.spawn(async move {
                let result = timeout(HEALTH_PING_TIMEOUT, pool.pool().ping())
                    .await
                    .unwrap_or_else(|_| Err(format!("ping timed out after {HEALTH_PING_TIMEOUT:?}")));
                (tenant_id, pool, result)
            });
        }

        while let Some(joined) = probes.join_next().await {
            let (tenant_id, pool, result) = match joined {
                Ok(probe) => probe,
                Err(e) => {
                    tracing::error!(error = %e, "health probe task failed");
                    continue;
                }
            };
            sweep.checked += 1;

            match result {
                Ok(()) => {
                    if pool.mark_healthy() {
                        sweep.recovered += 1;
                        tracing::info!(tenant_id = %tenant_id, "tenant pool recovered");
                    }
                }
                Err(message) => {
                    sweep.failed += 1;
                    let first_failure = pool.mark_unhealthy();
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        error = %message,
                        first_failure,
                        "tenant pool health check failed"
                    );
                    let refs = pool.active_refs();
                    if refs > 0 {
                        tracing::debug!(
                            tenant_id = %tenant_id,
                            active_refs = refs,
                            "unhealthy pool in use, leaving it for eviction"
                        );
                    } else if self
                        .close_pool_if_unreferenced(&tenant_id, &pool, "health check failed")
                        .await
                    {
                        sweep.closed += 1;
                    }
                }
            }
        }

        tracing::debug!(
            checked = sweep.checked,
            failed = sweep.failed,
            closed = sweep.closed,
            "health check sweep complete"
        );
        sweep
    }

    fn referenced_pools(&self) -> usize {
        self.pools
            .iter()
            .filter(|entry| entry.value().active_refs() > 0)
            .count()
    }

    /// Copy out the map so callers can close pools without holding shard
    /// guards across awaits.
    fn snapshot(&self) -> Vec<(TenantId, Arc<ManagedPool<O::Pool>>)> {
        self.pools
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}

async fn eviction_loop<O: PoolOpener>(
    inner: Arc<Inner<O>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow_and_update() {
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                tracing::debug!(pools = inner.pools.len(), "eviction tick");
                inner.evict_idle_pools().await;
            }
            _ = shutdown.changed() => {
                tracing::debug!("eviction loop shutting down");
                break;
            }
        }
    }
}

async fn health_check_loop<O: PoolOpener>(
    inner: Arc<Inner<O>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow_and_update() {
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                inner.check_pools_health().await;
            }
            _ = shutdown.changed() => {
                tracing::debug!("health check loop shutting down");
                break;
            }
        }
    }
}

impl<O: PoolOpener> fmt::Debug for PoolManager<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.inner.config)
            .field("pools", &self.inner.pools.len())
            .field("closed", &self.inner.shutting_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

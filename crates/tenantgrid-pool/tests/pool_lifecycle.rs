//! Pool lifecycle integration tests.
//!
//! Drives a `PoolManager` against an in-memory tenant directory and the
//! in-memory pool backend: concurrent creation, the pool ceiling, the status
//! gate, idle and unhealthy eviction, health checks, prewarm and drain.
//! Timing-sensitive scenarios run on a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use tenantgrid_core::{Tenant, TenantStatus};
use tenantgrid_pool::{ManagerConfig, MemoryOpener, PingBehavior, PoolError, PoolManager, Stage};
use tenantgrid_state::StateStore;

fn test_config() -> ManagerConfig {
    let mut config = ManagerConfig::new("app", "secret");
    config.pool_idle_timeout = Duration::from_secs(10);
    config.health_check_period = Duration::ZERO;
    config
}

fn setup(config: ManagerConfig) -> (PoolManager<MemoryOpener>, MemoryOpener, Arc<StateStore>) {
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let opener = MemoryOpener::new();
    let mgr = PoolManager::new(config, store.clone(), opener.clone()).unwrap();
    (mgr, opener, store)
}

fn add_tenant(store: &StateStore, slug: &str) -> Tenant {
    store
        .create_tenant(Tenant::new(slug, slug, "db.local", 5432, &db_name(slug)))
        .unwrap()
}

fn db_name(slug: &str) -> String {
    format!("{slug}_db")
}

// ── Concurrent creation ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_get_pool_converges_on_one_pool() {
    let (mgr, opener, store) = setup(test_config());
    let mgr = Arc::new(mgr);
    let t = add_tenant(&store, "acme");
    opener.set_open_delay(Duration::from_millis(20));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let mgr = Arc::clone(&mgr);
        let id = t.id.clone();
        handles.push(tokio::spawn(async move { mgr.get_pool(&id).await }));
    }
    let mut pools = Vec::new();
    for handle in handles {
        pools.push(handle.await.unwrap().unwrap());
    }

    assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
    assert_eq!(mgr.pool_count(), 1);
    assert_eq!(opener.live_count(), 1);
    assert_eq!(opener.open_count(), opener.close_count() + 1);
    assert!(!pools[0].is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_leases_share_one_pool() {
    let (mgr, opener, store) = setup(test_config());
    let mgr = Arc::new(mgr);
    let t = add_tenant(&store, "acme");
    opener.set_open_delay(Duration::from_millis(20));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let mgr = Arc::clone(&mgr);
        let id = t.id.clone();
        handles.push(tokio::spawn(async move { mgr.lease(&id).await }));
    }
    let mut leases = Vec::new();
    for handle in handles {
        leases.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(leases[0].active_refs(), 8);
    assert_eq!(opener.live_count(), 1);
    drop(leases);
    assert_eq!(mgr.stats().tenant(&t.id).unwrap().active_refs, 0);
}

// ── Ceiling ──────────────────────────────────────────────────────

#[tokio::test]
async fn pool_ceiling_blocks_new_tenants() {
    let mut config = test_config();
    config.max_total_pools = 2;
    let (mgr, opener, store) = setup(config);
    let a = add_tenant(&store, "a");
    let b = add_tenant(&store, "b");
    let c = add_tenant(&store, "c");

    mgr.get_pool(&a.id).await.unwrap();
    mgr.get_pool(&b.id).await.unwrap();
    let err = mgr.get_pool(&c.id).await.unwrap_err();
    assert!(matches!(err, PoolError::MaxPoolLimit { limit: 2 }));
    assert_eq!(opener.open_count(), 2);

    // Existing tenants still resolve at the ceiling.
    mgr.get_pool(&a.id).await.unwrap();

    assert!(mgr.retire_tenant(&b.id, "make room").await);
    mgr.get_pool(&c.id).await.unwrap();
    assert_eq!(mgr.pool_count(), 2);
}

#[tokio::test]
async fn zero_ceiling_is_unlimited() {
    let mut config = test_config();
    config.max_total_pools = 0;
    let (mgr, _opener, store) = setup(config);
    for i in 0..5 {
        let t = add_tenant(&store, &format!("t{i}"));
        mgr.get_pool(&t.id).await.unwrap();
    }
    assert_eq!(mgr.pool_count(), 5);
}

// ── Status gate ──────────────────────────────────────────────────

#[tokio::test]
async fn inactive_tenants_never_get_a_pool() {
    let (mgr, opener, store) = setup(test_config());
    let suspended = store
        .create_tenant(
            Tenant::new("sus", "Sus", "db.local", 5432, "sus_db").with_status(TenantStatus::Suspended),
        )
        .unwrap();

    let err = mgr.get_pool(&suspended.id).await.unwrap_err();
    assert!(matches!(
        err,
        PoolError::TenantNotActive { status: TenantStatus::Suspended, .. }
    ));
    assert_eq!(opener.open_count(), 0);
}

#[tokio::test]
async fn suspending_a_tenant_retires_only_its_pool() {
    let (mgr, opener, store) = setup(test_config());
    let a = add_tenant(&store, "a");
    let b = add_tenant(&store, "b");
    let pool_a = mgr.get_pool(&a.id).await.unwrap();
    let pool_b = mgr.get_pool(&b.id).await.unwrap();

    mgr.update_tenant_status(&a.id, TenantStatus::Suspended)
        .await
        .unwrap();

    assert!(pool_a.is_closed());
    assert!(!pool_b.is_closed());
    assert!(mgr.contains(&b.id));
    assert_eq!(mgr.pool_count(), 1);
    assert_eq!(opener.close_count(), 1);

    let err = mgr.get_pool(&a.id).await.unwrap_err();
    assert!(matches!(err, PoolError::TenantNotActive { .. }));

    mgr.update_tenant_status(&a.id, TenantStatus::Active)
        .await
        .unwrap();
    mgr.get_pool(&a.id).await.unwrap();
    assert_eq!(mgr.pool_count(), 2);
}

#[tokio::test]
async fn updating_unknown_tenant_is_not_found() {
    let (mgr, _opener, _store) = setup(test_config());
    let err = mgr
        .update_tenant_status("ghost", TenantStatus::Deleted)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::TenantNotFound(_)));
}

// ── Idle eviction ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn idle_pool_is_evicted_referenced_pool_is_kept() {
    let (mgr, opener, store) = setup(test_config());
    let idle = add_tenant(&store, "idle");
    let busy = add_tenant(&store, "busy");

    let idle_pool = mgr.get_pool(&idle.id).await.unwrap();
    let lease = mgr.lease(&busy.id).await.unwrap();

    tokio::time::advance(Duration::from_secs(12)).await;
    assert_eq!(mgr.evict_idle_pools().await, 1);

    assert!(idle_pool.is_closed());
    assert!(!mgr.contains(&idle.id));
    assert!(mgr.contains(&busy.id));
    assert_eq!(mgr.pool_count(), 1);
    assert_eq!(opener.close_count(), 1);
    drop(lease);
}

#[tokio::test(start_paused = true)]
async fn recently_used_pool_survives_eviction() {
    let (mgr, _opener, store) = setup(test_config());
    let t = add_tenant(&store, "acme");
    mgr.get_pool(&t.id).await.unwrap();

    tokio::time::advance(Duration::from_secs(8)).await;
    mgr.get_pool(&t.id).await.unwrap();
    tokio::time::advance(Duration::from_secs(8)).await;

    assert_eq!(mgr.evict_idle_pools().await, 0);
    assert!(mgr.contains(&t.id));
}

#[tokio::test(start_paused = true)]
async fn eviction_loop_retires_idle_pools() {
    let (mgr, opener, store) = setup(test_config());
    let t = add_tenant(&store, "acme");
    mgr.get_pool(&t.id).await.unwrap();
    mgr.start().await;

    // Ticks every 5s; the pool is past its 10s idle timeout by the 15s tick.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(mgr.contains(&t.id));
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!mgr.contains(&t.id));
    assert_eq!(opener.live_count(), 0);

    mgr.close().await;
}

#[tokio::test(start_paused = true)]
async fn zero_idle_timeout_never_evicts_healthy_pools() {
    let mut config = test_config();
    config.pool_idle_timeout = Duration::ZERO;
    let (mgr, _opener, store) = setup(config);
    let t = add_tenant(&store, "acme");
    mgr.get_pool(&t.id).await.unwrap();

    tokio::time::advance(Duration::from_secs(86_400)).await;
    assert_eq!(mgr.evict_idle_pools().await, 0);
    assert!(mgr.contains(&t.id));
}

// ── Health checks ────────────────────────────────────────────────

#[tokio::test]
async fn failing_unreferenced_pool_is_closed_immediately() {
    let (mgr, opener, store) = setup(test_config());
    let bad = add_tenant(&store, "bad");
    let good = add_tenant(&store, "good");
    mgr.get_pool(&bad.id).await.unwrap();
    mgr.get_pool(&good.id).await.unwrap();

    opener.set_ping(&db_name("bad"), PingBehavior::Failing);
    let sweep = mgr.check_pools_health().await;
    assert_eq!(sweep.checked, 2);
    assert_eq!(sweep.failed, 1);
    assert_eq!(sweep.closed, 1);
    assert!(!mgr.contains(&bad.id));
    assert!(mgr.contains(&good.id));

    // Next request for the tenant builds a fresh pool once it is reachable.
    opener.set_ping(&db_name("bad"), PingBehavior::Healthy);
    let fresh = mgr.get_pool(&bad.id).await.unwrap();
    assert!(!fresh.is_unhealthy());
}

#[tokio::test]
async fn failing_referenced_pool_waits_for_eviction() {
    let (mgr, opener, store) = setup(test_config());
    let t = add_tenant(&store, "acme");
    let lease = mgr.lease(&t.id).await.unwrap();

    opener.set_ping(&db_name("acme"), PingBehavior::Failing);
    let sweep = mgr.check_pools_health().await;
    assert_eq!(sweep.failed, 1);
    assert_eq!(sweep.closed, 0);
    assert!(lease.is_unhealthy());
    assert_eq!(mgr.evict_idle_pools().await, 0);

    drop(lease);
    assert_eq!(mgr.evict_idle_pools().await, 1);
    assert_eq!(mgr.pool_count(), 0);
}

#[tokio::test]
async fn recovered_pool_is_not_evicted() {
    let (mgr, opener, store) = setup(test_config());
    let t = add_tenant(&store, "acme");
    let lease = mgr.lease(&t.id).await.unwrap();

    opener.set_ping(&db_name("acme"), PingBehavior::Failing);
    mgr.check_pools_health().await;
    let first_failure = lease.unhealthy_since().unwrap();

    mgr.check_pools_health().await;
    assert_eq!(lease.unhealthy_since(), Some(first_failure));

    opener.set_ping(&db_name("acme"), PingBehavior::Healthy);
    let sweep = mgr.check_pools_health().await;
    assert_eq!(sweep.recovered, 1);
    assert!(!lease.is_unhealthy());

    drop(lease);
    assert_eq!(mgr.evict_idle_pools().await, 0);
    assert!(mgr.contains(&t.id));
    assert!(mgr.stats().tenant(&t.id).unwrap().healthy);
}

#[tokio::test(start_paused = true)]
async fn hanging_ping_does_not_stall_the_sweep() {
    let (mgr, opener, store) = setup(test_config());
    let stuck = add_tenant(&store, "stuck");
    let fine = add_tenant(&store, "fine");
    mgr.get_pool(&stuck.id).await.unwrap();
    mgr.get_pool(&fine.id).await.unwrap();

    opener.set_ping(&db_name("stuck"), PingBehavior::Hanging);
    let started = tokio::time::Instant::now();
    let sweep = mgr.check_pools_health().await;

    assert!(started.elapsed() >= tenantgrid_pool::HEALTH_PING_TIMEOUT);
    assert!(started.elapsed() < tenantgrid_pool::HEALTH_PING_TIMEOUT * 2);
    assert_eq!(sweep.checked, 2);
    assert_eq!(sweep.failed, 1);
    assert!(!mgr.contains(&stuck.id));
    assert!(mgr.contains(&fine.id));
}

#[tokio::test(start_paused = true)]
async fn health_loop_marks_and_closes_failures() {
    let mut config = test_config();
    config.pool_idle_timeout = Duration::ZERO;
    config.health_check_period = Duration::from_secs(30);
    let (mgr, opener, store) = setup(config);
    let t = add_tenant(&store, "acme");
    mgr.get_pool(&t.id).await.unwrap();
    mgr.start().await;

    opener.set_ping(&db_name("acme"), PingBehavior::Failing);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!mgr.contains(&t.id));

    mgr.close().await;
}

// ── Prewarm ──────────────────────────────────────────────────────

#[tokio::test]
async fn prewarm_opens_every_active_tenant() {
    let (mgr, _opener, store) = setup(test_config());
    for slug in ["a", "b", "c"] {
        add_tenant(&store, slug);
    }
    store
        .create_tenant(Tenant::new("off", "Off", "db.local", 5432, "off_db").with_status(TenantStatus::Deleted))
        .unwrap();

    assert_eq!(mgr.prewarm_pools().await.unwrap(), 3);
    assert_eq!(mgr.pool_count(), 3);
}

#[tokio::test]
async fn prewarm_reports_first_failure_after_trying_all() {
    let (mgr, opener, store) = setup(test_config());
    add_tenant(&store, "a");
    add_tenant(&store, "b");
    add_tenant(&store, "broken");
    opener.set_ping(&db_name("broken"), PingBehavior::Failing);

    let err = mgr.prewarm_pools().await.unwrap_err();
    assert!(matches!(err, PoolError::Infrastructure { stage: Stage::Ping, .. }));
    assert_eq!(mgr.pool_count(), 2);
    assert_eq!(opener.open_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prewarm_respects_pool_ceiling() {
    let mut config = test_config();
    config.max_total_pools = 2;
    let (mgr, opener, store) = setup(config);
    for i in 0..10 {
        add_tenant(&store, &format!("t{i}"));
    }
    opener.set_open_delay(Duration::from_millis(20));

    let result = mgr.prewarm_pools().await;
    assert!(matches!(result, Err(PoolError::MaxPoolLimit { limit: 2 })));
    assert_eq!(mgr.pool_count(), 2);
    assert_eq!(opener.open_count(), 2);
    assert_eq!(opener.live_count(), 2);
}

// ── Shutdown ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn drain_waits_for_leases_then_closes() {
    let (mgr, opener, store) = setup(test_config());
    let t = add_tenant(&store, "acme");
    let lease = mgr.lease(&t.id).await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(lease);
    });

    assert_eq!(mgr.drain(Duration::from_secs(5)).await, 0);
    assert_eq!(mgr.pool_count(), 0);
    assert_eq!(opener.live_count(), 0);
    assert!(matches!(mgr.get_pool(&t.id).await, Err(PoolError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn drain_force_closes_after_timeout() {
    let (mgr, opener, store) = setup(test_config());
    let t = add_tenant(&store, "acme");
    let lease = mgr.lease(&t.id).await.unwrap();

    assert_eq!(mgr.drain(Duration::from_secs(1)).await, 1);
    assert!(lease.is_closed());
    assert_eq!(opener.live_count(), 0);
}

#[tokio::test]
async fn start_after_close_is_a_no_op() {
    let (mgr, _opener, _store) = setup(test_config());
    mgr.close().await;
    mgr.start().await;
    assert!(mgr.is_closed());
}

//! Property-Based Tests for the Tenant Connection Manager
//!
//! **Property 1: Single Pool Per Tenant**
//!
//! For any tenant present in the catalog, repeated and concurrent calls with
//! caching enabled SHALL construct exactly one pool and return the same
//! instance, consulting the catalog once.
//!
//! **Property 2: Failures Leave No Trace**
//!
//! For any tenant absent from the catalog, or any empty tenant key, the
//! call SHALL fail and the cache SHALL be left unchanged.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tenantdb_core::{BrokerError, ConnectOptions, RequestContext, SetupStage, ValidationError};
use tenantdb_pool::{ConnectionCache, TenantConnectionManager};
use tenantdb_test_utils::{tenant_key_strategy, MockCatalog, MockConnector, MockHandle};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

struct Harness {
    catalog: Arc<MockCatalog>,
    manager: Arc<TenantConnectionManager<MockConnector>>,
}

fn harness<'a>(tenants: impl IntoIterator<Item = &'a str>) -> Harness {
    let catalog = Arc::new(MockCatalog::with_tenants(tenants));
    let cache: Arc<ConnectionCache<MockHandle>> = Arc::default();
    let manager = Arc::new(TenantConnectionManager::new(
        catalog.clone(),
        MockConnector::new(),
        cache,
    ));
    Harness { catalog, manager }
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// **Property 1.1: Repeated calls reuse the cached pool**
    #[test]
    fn prop_second_call_hits_cache(tenant in tenant_key_strategy(), calls in 2usize..6) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = harness([tenant.as_str()]);
            let ctx = RequestContext::background();

            let first = h.manager
                .get_connection(&ctx, ConnectOptions::new(tenant.as_str()))
                .await
                .map_err(|e| TestCaseError::fail(format!("get_connection failed: {}", e)))?;

            for _ in 1..calls {
                let again = h.manager
                    .get_connection(&ctx, ConnectOptions::new(tenant.as_str()))
                    .await
                    .map_err(|e| TestCaseError::fail(format!("get_connection failed: {}", e)))?;
                prop_assert!(Arc::ptr_eq(&first, &again));
            }

            prop_assert_eq!(h.catalog.calls(), 1);
            prop_assert_eq!(h.manager.connector().constructed(), 1);
            prop_assert_eq!(first.tenant(), tenant.as_str());
            Ok(())
        })?;
    }

    /// **Property 1.2: Concurrent first calls build exactly one pool**
    #[test]
    fn prop_concurrent_calls_build_one_pool(tenant in tenant_key_strategy(), callers in 2usize..12) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = harness([tenant.as_str()]);
            h.catalog.set_delay(Some(Duration::from_millis(5)));
            h.manager.connector().set_delay(Some(Duration::from_millis(5)));

            let mut tasks = Vec::with_capacity(callers);
            for _ in 0..callers {
                let manager = Arc::clone(&h.manager);
                let tenant = tenant.clone();
                tasks.push(tokio::spawn(async move {
                    manager
                        .get_connection(&RequestContext::background(), ConnectOptions::new(tenant))
                        .await
                }));
            }

            let mut pools = Vec::with_capacity(callers);
            for task in tasks {
                let pool = task
                    .await
                    .map_err(|e| TestCaseError::fail(format!("task panicked: {}", e)))?
                    .map_err(|e| TestCaseError::fail(format!("get_connection failed: {}", e)))?;
                pools.push(pool);
            }

            prop_assert_eq!(h.manager.connector().constructed(), 1);
            prop_assert_eq!(h.catalog.calls(), 1);
            for pool in &pools[1..] {
                prop_assert!(Arc::ptr_eq(&pools[0], pool));
            }
            Ok(())
        })?;
    }

    /// **Property 2.1: Unknown tenants are not cached**
    #[test]
    fn prop_not_found_leaves_cache_empty(
        known in tenant_key_strategy(),
        unknown in tenant_key_strategy(),
    ) {
        prop_assume!(known != unknown);
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = harness([known.as_str()]);
            let ctx = RequestContext::background();

            let err = h.manager
                .get_connection(&ctx, ConnectOptions::new(unknown.as_str()))
                .await
                .err()
                .ok_or_else(|| TestCaseError::fail("unknown tenant resolved"))?;

            prop_assert!(err.is_not_found());
            prop_assert!(err.to_string().starts_with("Failed to get tenant info: record not found"));
            prop_assert!(h.manager.cached(&unknown).is_none());
            prop_assert!(h.manager.cache().is_empty());
            prop_assert_eq!(h.manager.connector().constructed(), 0);
            Ok(())
        })?;
    }

    /// **Property 1.3: Defaults resolve identically for any tenant**
    #[test]
    fn prop_defaults_applied(tenant in tenant_key_strategy()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let h = harness([tenant.as_str()]);
            let pool = h.manager
                .get_connection(&RequestContext::background(), ConnectOptions::new(tenant.as_str()))
                .await
                .map_err(|e| TestCaseError::fail(format!("get_connection failed: {}", e)))?;

            let options = pool.options();
            prop_assert_eq!(options.pool.max_open_conns, 25);
            prop_assert_eq!(options.pool.max_idle_conns, 25);
            prop_assert_eq!(options.pool.conn_max_idle, Duration::from_secs(3600));
            prop_assert_eq!(options.pool.conn_max_lifetime, Duration::from_secs(3600));
            prop_assert_eq!(options.cache_ttl, Duration::from_secs(55 * 60));
            prop_assert!(options.cache_enabled);
            Ok(())
        })?;
    }
}

// ============================================================================
// EXAMPLE TESTS
// ============================================================================

#[tokio::test]
async fn test_empty_tenant_rejected_without_io() {
    let h = harness(["acme"]);

    let err = h
        .manager
        .get_connection(&RequestContext::background(), ConnectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BrokerError::Validation(ValidationError::RequiredFieldMissing { ref field }) if field == "tenant"
    ));
    assert_eq!(h.catalog.calls(), 0);
    assert_eq!(h.manager.connector().constructed(), 0);
    assert!(h.manager.cache().is_empty());
}

#[tokio::test]
async fn test_stale_cached_pool_is_replaced() {
    let h = harness(["acme"]);
    let ctx = RequestContext::background();

    let first = h
        .manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();
    h.manager.connector().last_handle().unwrap().set_healthy(false);

    let second = h
        .manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.id(), second.id());
    assert_eq!(h.catalog.calls(), 2);
    assert_eq!(h.manager.connector().constructed(), 2);
    assert!(Arc::ptr_eq(&h.manager.cached("acme").unwrap(), &second));
}

#[tokio::test]
async fn test_cached_pool_with_stalled_probe_is_replaced() {
    let h = harness(["acme"]);

    let first = h
        .manager
        .get_connection(&RequestContext::background(), ConnectOptions::new("acme"))
        .await
        .unwrap();
    h.manager
        .connector()
        .last_handle()
        .unwrap()
        .set_ping_delay(Some(Duration::from_secs(5)));

    let ctx = RequestContext::background().with_timeout(Duration::from_millis(20));
    let started = std::time::Instant::now();
    let second = h
        .manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_ne!(first.id(), second.id());
    assert!(Arc::ptr_eq(&h.manager.cached("acme").unwrap(), &second));
}

#[tokio::test]
async fn test_cache_disabled_builds_every_time() {
    let h = harness(["acme"]);
    let ctx = RequestContext::background();

    let a = h
        .manager
        .get_connection(&ctx, ConnectOptions::new("acme").with_cache(false))
        .await
        .unwrap();
    let b = h
        .manager
        .get_connection(&ctx, ConnectOptions::new("acme").with_cache(false))
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert!(!a.is_cache_managed());
    assert_eq!(h.manager.connector().constructed(), 2);
    assert!(h.manager.cache().is_empty());

    // Closing an uncached pool touches nothing shared.
    a.close().await.unwrap();
    assert!(b.is_healthy(&ctx).await);
}

#[tokio::test]
async fn test_setup_failure_closes_pool_and_skips_cache() {
    let h = harness(["acme"]);
    h.manager
        .connector()
        .fail_statements_starting_with(Some("SET TIMEZONE".to_string()));

    let err = h
        .manager
        .get_connection(
            &RequestContext::background(),
            ConnectOptions::new("acme").with_force_utc(true),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BrokerError::Setup {
            stage: SetupStage::Timezone,
            ..
        }
    ));
    let handle = h.manager.connector().last_handle().unwrap();
    assert!(handle.is_closed());
    assert_eq!(handle.closes(), 1);
    assert!(h.manager.cached("acme").is_none());
}

#[tokio::test]
async fn test_unreachable_database_fails_initial_probe() {
    let h = harness(["acme"]);
    h.manager.connector().set_unhealthy_on_open(true);

    let err = h
        .manager
        .get_connection(&RequestContext::background(), ConnectOptions::new("acme"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BrokerError::Setup {
            stage: SetupStage::Ping,
            ..
        }
    ));
    assert!(h.manager.connector().last_handle().unwrap().is_closed());
    assert!(h.manager.cache().is_empty());
}

#[tokio::test]
async fn test_catalog_outage_is_reported() {
    let h = harness(["acme"]);
    h.catalog.set_unavailable(true);

    let err = h
        .manager
        .get_connection(&RequestContext::background(), ConnectOptions::new("acme"))
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::Catalog(_)));
    assert!(!err.is_not_found());
    assert_eq!(h.manager.connector().constructed(), 0);
}

#[tokio::test]
async fn test_tenants_get_distinct_pools() {
    let h = harness(["acme", "globex"]);
    let ctx = RequestContext::background();

    let acme = h
        .manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();
    let globex = h
        .manager
        .get_connection(&ctx, ConnectOptions::new("globex"))
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&acme, &globex));
    assert_eq!(acme.schema(), "acme");
    assert_eq!(globex.schema(), "globex");
    assert_eq!(h.manager.cache().len(), 2);
}

#[tokio::test]
async fn test_evict_and_close_all() {
    let h = harness(["acme"]);
    let ctx = RequestContext::background();

    let pool = h
        .manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();

    h.manager.close_all().await.unwrap();
    assert!(h.manager.cached("acme").is_some());
    assert!(pool.is_healthy(&ctx).await);

    assert!(h.manager.evict("acme").await);
    assert!(!h.manager.evict("acme").await);
    assert!(h.manager.cached("acme").is_none());
    // Evicted, not closed.
    assert!(pool.is_healthy(&ctx).await);
}

#[tokio::test]
async fn test_cache_stats_track_hits() {
    let h = harness(["acme"]);
    let ctx = RequestContext::background();

    for _ in 0..3 {
        h.manager
            .get_connection(&ctx, ConnectOptions::new("acme"))
            .await
            .unwrap();
    }

    let stats = h.manager.cache_stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.total_cost, 1);
}

//! Close and eviction semantics for cached tenant pools.

use std::sync::Arc;

use tenantdb_core::{ConnectOptions, HealthStatus, RequestContext};
use tenantdb_pool::{ConnectionCache, TenantConnectionManager};
use tenantdb_test_utils::{MockCatalog, MockConnector, MockHandle};

fn manager() -> (Arc<MockCatalog>, TenantConnectionManager<MockConnector>) {
    let catalog = Arc::new(MockCatalog::with_tenants(["acme", "globex"]));
    let cache: Arc<ConnectionCache<MockHandle>> = Arc::default();
    let manager = TenantConnectionManager::new(catalog.clone(), MockConnector::new(), cache);
    (catalog, manager)
}

#[tokio::test]
async fn test_close_evicts_and_next_call_rebuilds() {
    let (catalog, manager) = manager();
    let ctx = RequestContext::background();

    let pool = manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();
    pool.close().await.unwrap();

    assert!(!pool.is_healthy(&ctx).await);
    assert!(pool.handle().await.unwrap_err().is_closed());
    assert!(manager.cached("acme").is_none());

    let rebuilt = manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();
    assert_ne!(pool.id(), rebuilt.id());
    assert!(rebuilt.is_healthy(&ctx).await);
    assert_eq!(catalog.calls(), 2);
}

#[tokio::test]
async fn test_double_close_returns_ok() {
    let (_, manager) = manager();
    let pool = manager
        .get_connection(&RequestContext::background(), ConnectOptions::new("acme"))
        .await
        .unwrap();

    pool.close().await.unwrap();
    pool.close().await.unwrap();
    assert_eq!(manager.connector().last_handle().unwrap().closes(), 1);
}

#[tokio::test]
async fn test_late_close_does_not_evict_replacement() {
    let (_, manager) = manager();
    let ctx = RequestContext::background();

    let stale = manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();
    manager.connector().last_handle().unwrap().set_healthy(false);

    let replacement = manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();
    assert_ne!(stale.id(), replacement.id());

    stale.close().await.unwrap();
    let cached = manager.cached("acme").unwrap();
    assert!(Arc::ptr_eq(&cached, &replacement));
    assert!(replacement.is_healthy(&ctx).await);
}

#[tokio::test]
async fn test_close_only_evicts_own_tenant() {
    let (_, manager) = manager();
    let ctx = RequestContext::background();

    let acme = manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();
    manager
        .get_connection(&ctx, ConnectOptions::new("globex"))
        .await
        .unwrap();

    acme.close().await.unwrap();
    assert!(manager.cached("acme").is_none());
    assert!(manager.cached("globex").is_some());
}

#[tokio::test]
async fn test_close_after_manager_dropped() {
    let (_, manager) = manager();
    let pool = manager
        .get_connection(&RequestContext::background(), ConnectOptions::new("acme"))
        .await
        .unwrap();
    let cache = Arc::clone(manager.cache());
    drop(manager);
    drop(cache);

    // The cache is gone; close still releases the driver pool.
    assert!(pool.close().await.is_ok());
    assert!(pool.is_closed().await);
}

#[tokio::test]
async fn test_close_surfaces_driver_error() {
    let (_, manager) = manager();
    let ctx = RequestContext::background();
    let pool = manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();
    manager.connector().last_handle().unwrap().set_fail_close(true);

    assert!(pool.close().await.is_err());
    assert!(manager.cached("acme").is_none());
    assert_eq!(pool.health_report(&ctx).await.status, HealthStatus::Closed);
}

#[tokio::test]
async fn test_concurrent_close_and_get() {
    let (_, manager) = manager();
    let manager = Arc::new(manager);
    let ctx = RequestContext::background();

    let pool = manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();

    let closer = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.close().await })
    };
    let getter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .get_connection(&RequestContext::background(), ConnectOptions::new("acme"))
                .await
        })
    };

    closer.await.unwrap().unwrap();
    let got = getter.await.unwrap().unwrap();

    // A getter that ran before the close received the original pool.
    if Arc::ptr_eq(&got, &pool) {
        assert!(pool.is_closed().await);
    }
    let fresh = manager
        .get_connection(&ctx, ConnectOptions::new("acme"))
        .await
        .unwrap();
    assert!(!fresh.is_closed().await);
}

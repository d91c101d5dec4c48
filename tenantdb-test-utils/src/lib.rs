//! TenantDB Test Utilities
//!
//! Centralized test infrastructure for the TenantDB workspace:
//! - A catalog double with a lookup counter
//! - A pool connector double with a construction counter
//! - A pool handle double that records every statement it sees
//! - Proptest generators for tenant keys

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use postgres_types::ToSql;
use proptest::prelude::*;

pub use tenantdb_core::{
    CatalogError, CatalogResolver, ConnectionString, DriverError, PoolConnector, PoolHandle,
    PoolSettings, PoolStatus, SetupStage, TenantCredentials,
};

// ============================================================================
// FIXTURES
// ============================================================================

/// Credentials for `tenant` pointing at a fictitious server.
pub fn credentials_for(tenant: &str) -> TenantCredentials {
    TenantCredentials {
        driver: "postgres".to_string(),
        user_name: format!("{}_user", tenant),
        password: "secret".to_string(),
        server: "db.test:5432".to_string(),
        database_name: "tenants".to_string(),
        schema_name: tenant.to_string(),
    }
}

/// Strategy producing valid tenant keys.
pub fn tenant_key_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{2,20}"
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn backend_error(operation: &'static str, message: &str) -> DriverError {
    DriverError::backend(operation, message.to_string())
}

// ============================================================================
// MOCK CATALOG
// ============================================================================

/// In-memory catalog that counts lookups.
#[derive(Debug, Default)]
pub struct MockCatalog {
    tenants: Mutex<HashMap<String, TenantCredentials>>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog pre-populated with fixture credentials for each tenant.
    pub fn with_tenants<'a>(tenants: impl IntoIterator<Item = &'a str>) -> Self {
        let catalog = Self::new();
        for tenant in tenants {
            catalog.insert(credentials_for(tenant));
        }
        catalog
    }

    pub fn insert(&self, credentials: TenantCredentials) {
        lock(&self.tenants).insert(credentials.schema_name.clone(), credentials);
    }

    /// Number of `resolve` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every lookup fail with a store error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay each lookup, to widen race windows in concurrency tests.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }
}

#[async_trait]
impl CatalogResolver for MockCatalog {
    async fn resolve(&self, tenant: &str) -> Result<TenantCredentials, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Store {
                tenant: tenant.to_string(),
                source: backend_error("catalog lookup", "catalog unavailable"),
            });
        }

        lock(&self.tenants)
            .get(tenant)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                tenant: tenant.to_string(),
            })
    }
}

// ============================================================================
// MOCK POOL HANDLE
// ============================================================================

/// A row returned by [`MockHandle`]: the statement that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRow {
    pub statement: String,
}

#[derive(Debug, Default)]
struct HandleState {
    session: Vec<String>,
    executed: Vec<String>,
    fail_prefixes: Vec<String>,
}

/// Pool handle double. Clones share state, so a test can keep a probe on
/// the handle the broker owns.
#[derive(Debug, Clone)]
pub struct MockHandle {
    inner: Arc<MockHandleInner>,
}

#[derive(Debug)]
struct MockHandleInner {
    dsn: String,
    settings: PoolSettings,
    healthy: AtomicBool,
    closed: AtomicBool,
    pings: AtomicUsize,
    closes: AtomicUsize,
    fail_close: AtomicBool,
    fail_pings_after: Mutex<Option<usize>>,
    ping_delay: Mutex<Option<Duration>>,
    state: Mutex<HandleState>,
}

impl MockHandle {
    pub fn new(dsn: impl Into<String>, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(MockHandleInner {
                dsn: dsn.into(),
                settings,
                healthy: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                pings: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail_close: AtomicBool::new(false),
                fail_pings_after: Mutex::new(None),
                ping_delay: Mutex::new(None),
                state: Mutex::new(HandleState::default()),
            }),
        }
    }

    pub fn dsn(&self) -> &str {
        &self.inner.dsn
    }

    pub fn settings(&self) -> PoolSettings {
        self.inner.settings
    }

    /// Make subsequent pings succeed or fail.
    pub fn set_healthy(&self, healthy: bool) {
        self.inner.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.inner.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Let the first `pings` probes succeed and fail every later one.
    pub fn set_fail_pings_after(&self, pings: Option<usize>) {
        *lock(&self.inner.fail_pings_after) = pings;
    }

    /// Delay each ping, to exercise deadlines around liveness probes.
    pub fn set_ping_delay(&self, delay: Option<Duration>) {
        *lock(&self.inner.ping_delay) = delay;
    }

    /// Fail any statement starting with `prefix`.
    pub fn fail_statements_starting_with(&self, prefix: impl Into<String>) {
        lock(&self.inner.state).fail_prefixes.push(prefix.into());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.inner.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Session statements applied so far, in order.
    pub fn session_statements(&self) -> Vec<String> {
        lock(&self.inner.state).session.clone()
    }

    /// Statements executed or queried so far, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.inner.state).executed.clone()
    }

    fn check_open(&self) -> Result<(), DriverError> {
        if self.is_closed() {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    fn run(&self, operation: &'static str, statement: &str) -> Result<(), DriverError> {
        self.check_open()?;
        let mut state = lock(&self.inner.state);
        if state
            .fail_prefixes
            .iter()
            .any(|prefix| statement.starts_with(prefix.as_str()))
        {
            return Err(backend_error(operation, "statement rejected"));
        }
        state.executed.push(statement.to_string());
        Ok(())
    }
}

#[async_trait]
impl PoolHandle for MockHandle {
    type Row = MockRow;

    async fn ping(&self) -> Result<(), DriverError> {
        let seen = self.inner.pings.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *lock(&self.inner.ping_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_open()?;

        let exhausted = matches!(*lock(&self.inner.fail_pings_after), Some(limit) if seen > limit);
        if self.inner.healthy.load(Ordering::SeqCst) && !exhausted {
            Ok(())
        } else {
            Err(backend_error("ping", "connection refused"))
        }
    }

    async fn apply_session(&self, statement: &str) -> Result<(), DriverError> {
        self.check_open()?;
        let mut state = lock(&self.inner.state);
        if state
            .fail_prefixes
            .iter()
            .any(|prefix| statement.starts_with(prefix.as_str()))
        {
            return Err(backend_error("apply session statement", "statement rejected"));
        }
        state.session.push(statement.to_string());
        Ok(())
    }

    async fn execute(
        &self,
        statement: &str,
        _params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DriverError> {
        self.run("execute", statement)?;
        Ok(1)
    }

    async fn query(
        &self,
        statement: &str,
        _params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<MockRow>, DriverError> {
        self.run("query", statement)?;
        Ok(vec![MockRow {
            statement: statement.to_string(),
        }])
    }

    async fn query_one(
        &self,
        statement: &str,
        _params: &[&(dyn ToSql + Sync)],
    ) -> Result<MockRow, DriverError> {
        self.run("query_one", statement)?;
        Ok(MockRow {
            statement: statement.to_string(),
        })
    }

    fn close(&self) -> Result<(), DriverError> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.closed.store(true, Ordering::SeqCst);
        if self.inner.fail_close.load(Ordering::SeqCst) {
            return Err(backend_error("close", "close failed"));
        }
        Ok(())
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            max_size: self.inner.settings.max_open_conns,
            size: 0,
            available: 0,
        }
    }
}

// ============================================================================
// MOCK CONNECTOR
// ============================================================================

/// Connector double that counts pool constructions and keeps every handle
/// it has opened.
#[derive(Debug, Default)]
pub struct MockConnector {
    opened: Mutex<Vec<MockHandle>>,
    fail_open: AtomicBool,
    unhealthy_on_open: AtomicBool,
    fail_session_prefix: Mutex<Option<String>>,
    fail_pings_after: Mutex<Option<usize>>,
    delay: Mutex<Option<Duration>>,
    ping_delay: Mutex<Option<Duration>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pools constructed so far.
    pub fn constructed(&self) -> usize {
        lock(&self.opened).len()
    }

    /// Every handle opened so far, oldest first.
    pub fn handles(&self) -> Vec<MockHandle> {
        lock(&self.opened).clone()
    }

    pub fn last_handle(&self) -> Option<MockHandle> {
        lock(&self.opened).last().cloned()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// New handles start with failing pings.
    pub fn set_unhealthy_on_open(&self, unhealthy: bool) {
        self.unhealthy_on_open.store(unhealthy, Ordering::SeqCst);
    }

    /// New handles reject statements starting with `prefix`.
    pub fn fail_statements_starting_with(&self, prefix: Option<String>) {
        *lock(&self.fail_session_prefix) = prefix;
    }

    /// New handles fail every ping after the first `pings`.
    pub fn set_fail_pings_after(&self, pings: Option<usize>) {
        *lock(&self.fail_pings_after) = pings;
    }

    /// Delay each open, to widen race windows in concurrency tests.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    /// New handles delay each ping.
    pub fn set_ping_delay(&self, delay: Option<Duration>) {
        *lock(&self.ping_delay) = delay;
    }
}

#[async_trait]
impl PoolConnector for MockConnector {
    type Handle = MockHandle;

    async fn open(
        &self,
        dsn: &ConnectionString,
        settings: &PoolSettings,
    ) -> Result<MockHandle, DriverError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DriverError::InvalidConfig {
                reason: "open refused".to_string(),
            });
        }

        let handle = MockHandle::new(dsn.expose(), *settings);
        if self.unhealthy_on_open.load(Ordering::SeqCst) {
            handle.set_healthy(false);
        }
        if let Some(prefix) = lock(&self.fail_session_prefix).clone() {
            handle.fail_statements_starting_with(prefix);
        }
        handle.set_fail_pings_after(*lock(&self.fail_pings_after));
        handle.set_ping_delay(*lock(&self.ping_delay));
        lock(&self.opened).push(handle.clone());
        Ok(handle)
    }
}

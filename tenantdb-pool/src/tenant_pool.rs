//! A schema-scoped connection pool for one tenant.
//!
//! A [`TenantPool`] owns the driver handle, the options it was built with
//! and a closed flag. The handle itself is never swapped out or nulled;
//! once the pool is closed every accessor refuses to hand it out.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use postgres_types::ToSql;
use serde_json::json;
use tenantdb_cache::CacheKey;
use tenantdb_core::{
    default_query_logger, BrokerError, BrokerResult, DeadlineExceeded, DriverError, HealthCheck,
    PoolHandle, PoolStatus, RequestContext, ResolvedOptions,
};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pool_cache::ConnectionCache;

/// Where a cached pool lives, so `close` can evict it.
pub(crate) struct CacheSlot<H: PoolHandle> {
    pub(crate) cache: Weak<ConnectionCache<H>>,
    pub(crate) key: CacheKey,
}

#[derive(Debug, Default)]
struct PoolState {
    closed: bool,
}

/// Live pool for one tenant plus the options it was created with.
pub struct TenantPool<H: PoolHandle> {
    id: Uuid,
    handle: Arc<H>,
    schema: String,
    options: ResolvedOptions,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    state: RwLock<PoolState>,
    slot: Option<CacheSlot<H>>,
}

impl<H: PoolHandle> TenantPool<H> {
    pub(crate) fn new(
        handle: H,
        schema: String,
        options: ResolvedOptions,
        slot: Option<CacheSlot<H>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            handle: Arc::new(handle),
            schema,
            options,
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
            state: RwLock::new(PoolState::default()),
            slot,
        }
    }

    /// Identity of this pool instance. A rebuilt pool gets a new id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant(&self) -> &str {
        &self.options.tenant
    }

    /// Schema the pool's search path is pinned to.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at_utc
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// True when this pool was stored in the broker's cache.
    pub fn is_cache_managed(&self) -> bool {
        self.slot.is_some()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// The driver handle, unless the pool has been closed.
    pub async fn handle(&self) -> BrokerResult<Arc<H>> {
        let state = self.state.read().await;
        if state.closed {
            return Err(self.closed_error());
        }
        Ok(Arc::clone(&self.handle))
    }

    pub fn status(&self) -> PoolStatus {
        self.handle.status()
    }

    /// Probe liveness. False if closed, if the probe fails, or if `ctx`
    /// expires first.
    pub async fn is_healthy(&self, ctx: &RequestContext) -> bool {
        let state = self.state.read().await;
        if state.closed {
            return false;
        }
        matches!(ctx.run(self.handle.ping()).await, Ok(Ok(())))
    }

    /// Probe liveness and describe the result.
    pub async fn health_report(&self, ctx: &RequestContext) -> HealthCheck {
        let state = self.state.read().await;
        if state.closed {
            return HealthCheck::closed(self.tenant());
        }

        let started = Instant::now();
        let outcome = ctx.run(self.handle.ping()).await;
        let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let check = match outcome {
            Ok(Ok(())) => HealthCheck::healthy(self.tenant()),
            Ok(Err(err)) => HealthCheck::unhealthy(self.tenant(), err.to_string()),
            Err(DeadlineExceeded) => {
                HealthCheck::unhealthy(self.tenant(), "liveness probe deadline exceeded")
            }
        };

        let status = self.handle.status();
        check
            .with_response_time(elapsed_ms)
            .with_metadata("pool_id", json!(self.id.to_string()))
            .with_metadata("schema", json!(self.schema))
            .with_metadata("open_connections", json!(status.size))
            .with_metadata("idle_connections", json!(status.available))
            .with_metadata("age_secs", json!(self.age().as_secs()))
    }

    /// Close the pool and, if cached, evict it.
    ///
    /// Idempotent: closing an already-closed pool returns `Ok`. A failure
    /// reported by the driver is returned, but the pool is marked closed
    /// and evicted regardless.
    pub async fn close(&self) -> BrokerResult<()> {
        let cached = self
            .slot
            .as_ref()
            .and_then(|slot| slot.cache.upgrade().map(|cache| (cache, &slot.key)));
        let _cache_guard = match &cached {
            Some((cache, _)) => Some(cache.lock().await),
            None => None,
        };

        let mut state = self.state.write().await;
        if state.closed {
            return Ok(());
        }

        if let Some((cache, key)) = &cached {
            cache.remove_pool(key, self.id);
        }

        let result = self.handle.close();
        state.closed = true;

        match &result {
            Ok(()) => info!(tenant = %self.tenant(), pool_id = %self.id, "Tenant pool closed"),
            Err(err) => warn!(
                tenant = %self.tenant(),
                pool_id = %self.id,
                error = %err,
                "Tenant pool closed with driver error"
            ),
        }

        result.map_err(|source| BrokerError::Close {
            tenant: self.tenant().to_string(),
            source,
        })
    }

    // ========================================================================
    // LOGGED STATEMENTS
    // ========================================================================

    /// Execute a statement, returning the number of affected rows.
    pub async fn exec_with_log(
        &self,
        ctx: &RequestContext,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> BrokerResult<u64> {
        let handle = self.handle().await?;
        self.log_statement(ctx, statement, params);

        let started = Instant::now();
        let result = self
            .bounded(ctx, "execute", handle.execute(statement, params))
            .await;
        self.log_outcome("[TenantExec]", started.elapsed(), &result);
        result
    }

    /// Run a query, returning every row.
    pub async fn query_with_log(
        &self,
        ctx: &RequestContext,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> BrokerResult<Vec<H::Row>> {
        let handle = self.handle().await?;
        self.log_statement(ctx, statement, params);

        let started = Instant::now();
        let result = self
            .bounded(ctx, "query", handle.query(statement, params))
            .await;
        self.log_outcome("[TenantQuery]", started.elapsed(), &result);
        result
    }

    /// Run a single-row query.
    ///
    /// Never fails directly: a closed pool or a failed query is carried in
    /// the returned [`LoggedRow`] and surfaces when it is read.
    pub async fn query_row_with_log(
        &self,
        ctx: &RequestContext,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> LoggedRow<H::Row> {
        let handle = match self.handle().await {
            Ok(handle) => handle,
            Err(err) => return LoggedRow::failed(err),
        };
        self.log_statement(ctx, statement, params);

        let started = Instant::now();
        let result = self
            .bounded(ctx, "query_one", handle.query_one(statement, params))
            .await;
        self.log_outcome("[TenantQueryRow]", started.elapsed(), &result);
        LoggedRow { result }
    }

    fn log_statement(&self, ctx: &RequestContext, statement: &str, params: &[&(dyn ToSql + Sync)]) {
        let logger = self
            .options
            .query_logger
            .clone()
            .unwrap_or_else(default_query_logger);
        logger(ctx, statement, params);
    }

    fn log_outcome<T>(&self, label: &'static str, elapsed: Duration, result: &BrokerResult<T>) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        match result {
            Ok(_) => info!(
                target: "tenantdb::exec",
                tenant = %self.schema,
                elapsed_ms,
                outcome = "ok",
                "{}", label
            ),
            Err(err) => info!(
                target: "tenantdb::exec",
                tenant = %self.schema,
                elapsed_ms,
                outcome = "error",
                error = %err,
                "{}", label
            ),
        }
    }

    /// Drive a driver call under the caller's deadline.
    async fn bounded<T, F>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        call: F,
    ) -> BrokerResult<T>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        let budget = ctx.remaining().unwrap_or_default();
        let outcome = match ctx.run(call).await {
            Ok(outcome) => outcome,
            Err(DeadlineExceeded) => Err(DriverError::timeout(operation, budget)),
        };
        outcome.map_err(|source| BrokerError::Statement {
            tenant: self.tenant().to_string(),
            source,
        })
    }

    fn closed_error(&self) -> BrokerError {
        BrokerError::PoolClosed {
            tenant: self.tenant().to_string(),
        }
    }
}

impl<H: PoolHandle> fmt::Debug for TenantPool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantPool")
            .field("id", &self.id)
            .field("tenant", &self.options.tenant)
            .field("schema", &self.schema)
            .field("created_at", &self.created_at_utc)
            .field("cache_managed", &self.slot.is_some())
            .finish()
    }
}

/// Result of [`TenantPool::query_row_with_log`]. Any error is deferred
/// until the row is read.
#[derive(Debug)]
pub struct LoggedRow<R> {
    result: BrokerResult<R>,
}

impl<R> LoggedRow<R> {
    fn failed(err: BrokerError) -> Self {
        Self { result: Err(err) }
    }

    /// Take the row, or the error that prevented it.
    pub fn row(self) -> BrokerResult<R> {
        self.result
    }

    /// Decode the row with `decode`.
    pub fn map<T>(self, decode: impl FnOnce(R) -> T) -> BrokerResult<T> {
        self.result.map(decode)
    }

    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

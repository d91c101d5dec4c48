//! Tenant Connection Manager
//!
//! Resolves a tenant key to a configured, schema-scoped pool:
//!
//! 1. Validate options and apply defaults.
//! 2. With caching on, take the broker-wide lock and reuse a cached pool if
//!    it still answers a liveness probe; otherwise evict it.
//! 3. Look the tenant up in the catalog.
//! 4. Under a bounded setup deadline, open a pool, probe it, pin its
//!    search path, optionally force UTC, and probe it again.
//! 5. Cache the pool under its versioned key.
//!
//! The lock is held from step 2 through step 5, so concurrent callers for
//! the same tenant build exactly one pool.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tenantdb_cache::{CacheKey, CacheStats};
use tenantdb_core::{
    search_path_statement, BrokerError, BrokerResult, CatalogResolver, ConnectOptions,
    DeadlineExceeded, DriverError, PoolConnector, PoolHandle, RequestContext, ResolvedOptions,
    SetupStage, SET_TIMEZONE_UTC,
};
use tracing::{debug, info, warn};

use crate::factory::FactoryRegistry;
use crate::pool_cache::ConnectionCache;
use crate::tenant_pool::{CacheSlot, TenantPool};

/// Upper bound on the whole setup sequence of a new pool.
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool type produced by a manager over connector `C`.
pub type PoolOf<C> = TenantPool<<C as PoolConnector>::Handle>;

/// Resolves tenants to cached, configured pools.
pub struct TenantConnectionManager<C: PoolConnector> {
    catalog: Arc<dyn CatalogResolver>,
    connector: C,
    cache: Arc<ConnectionCache<C::Handle>>,
    factories: FactoryRegistry<C::Handle>,
    setup_timeout: Duration,
}

impl<C: PoolConnector> TenantConnectionManager<C> {
    pub fn new(
        catalog: Arc<dyn CatalogResolver>,
        connector: C,
        cache: Arc<ConnectionCache<C::Handle>>,
    ) -> Self {
        Self {
            catalog,
            connector,
            cache,
            factories: FactoryRegistry::new(),
            setup_timeout: SETUP_TIMEOUT,
        }
    }

    /// Override the bound on pool setup.
    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn cache(&self) -> &Arc<ConnectionCache<C::Handle>> {
        &self.cache
    }

    /// Adapter factories registered against this manager.
    pub fn factories(&self) -> &FactoryRegistry<C::Handle> {
        &self.factories
    }

    /// Return a healthy pool for `opts.tenant`, building one if needed.
    ///
    /// With caching disabled every call builds a fresh, uncached pool that
    /// the caller owns outright.
    pub async fn get_connection(
        &self,
        ctx: &RequestContext,
        opts: ConnectOptions,
    ) -> BrokerResult<Arc<PoolOf<C>>> {
        let opts = opts.resolve()?;

        if !opts.cache_enabled {
            debug!(tenant = %opts.tenant, "Cache disabled, building uncached pool");
            return self.build_pool(opts, None).await.map(Arc::new);
        }

        let key = CacheKey::for_tenant(&opts.tenant);
        let _guard = self.cache.lock().await;

        if let Some(pool) = self.cache.get(&key) {
            if pool.is_healthy(ctx).await {
                debug!(
                    tenant = %opts.tenant,
                    pool_id = %pool.id(),
                    age_secs = pool.age().as_secs(),
                    "Reusing cached tenant pool"
                );
                return Ok(pool);
            }
            warn!(
                tenant = %opts.tenant,
                pool_id = %pool.id(),
                "Cached tenant pool failed liveness probe, evicting"
            );
            self.cache.remove(&key);
        }

        let slot = CacheSlot {
            cache: Arc::downgrade(&self.cache),
            key: key.clone(),
        };
        let ttl = opts.cache_ttl;
        let pool = Arc::new(self.build_pool(opts, Some(slot)).await?);

        if !self.cache.insert(key, Arc::clone(&pool), ttl) {
            warn!(tenant = %pool.tenant(), "Tenant pool was not admitted to the cache");
        }
        Ok(pool)
    }

    /// The cached pool for `tenant`, without probing or building.
    pub fn cached(&self, tenant: &str) -> Option<Arc<PoolOf<C>>> {
        self.cache.get(&CacheKey::for_tenant(tenant))
    }

    /// Drop the cached pool for `tenant`. The pool stays open for holders
    /// of existing references and is released when the last one drops.
    pub async fn evict(&self, tenant: &str) -> bool {
        let _guard = self.cache.lock().await;
        let evicted = self.cache.remove(&CacheKey::for_tenant(tenant)).is_some();
        if evicted {
            info!(tenant, "Evicted cached tenant pool");
        }
        evicted
    }

    /// Acknowledge a shutdown request.
    ///
    /// The cache cannot enumerate its entries, so nothing is closed here;
    /// cached pools are released as their TTL passes. Callers that need
    /// deterministic shutdown must close the pools they hold.
    pub async fn close_all(&self) -> BrokerResult<()> {
        let _guard = self.cache.lock().await;
        info!(
            cached_pools = self.cache.len(),
            "close_all called, cached pools will be released by cache TTL"
        );
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Steps 3 and 4: catalog lookup, pool construction and setup.
    async fn build_pool(
        &self,
        opts: ResolvedOptions,
        slot: Option<CacheSlot<C::Handle>>,
    ) -> BrokerResult<PoolOf<C>> {
        let tenant = opts.tenant.clone();
        let credentials = self.catalog.resolve(&tenant).await?;
        let dsn = credentials.connection_string();

        // Open counts against the setup deadline too.
        let setup = RequestContext::background().with_timeout(self.setup_timeout);
        let opened = match setup.run(self.connector.open(&dsn, &opts.pool)).await {
            Ok(opened) => opened,
            Err(DeadlineExceeded) => Err(DriverError::timeout(
                SetupStage::Open.as_str(),
                self.setup_timeout,
            )),
        };
        let handle = opened.map_err(|source| {
            warn!(tenant = %tenant, error = %source, "Failed to open tenant pool");
            BrokerError::Setup {
                tenant: tenant.clone(),
                stage: SetupStage::Open,
                source,
            }
        })?;

        let search_path = search_path_statement(&credentials.schema_name);

        self.setup_step(&handle, &setup, &tenant, SetupStage::Ping, handle.ping())
            .await?;
        self.setup_step(
            &handle,
            &setup,
            &tenant,
            SetupStage::SearchPath,
            handle.apply_session(&search_path),
        )
        .await?;
        if opts.force_utc {
            self.setup_step(
                &handle,
                &setup,
                &tenant,
                SetupStage::Timezone,
                handle.apply_session(SET_TIMEZONE_UTC),
            )
            .await?;
        }
        self.setup_step(
            &handle,
            &setup,
            &tenant,
            SetupStage::FinalValidation,
            handle.ping(),
        )
        .await?;

        let pool = TenantPool::new(handle, credentials.schema_name, opts, slot);
        info!(
            tenant = %tenant,
            pool_id = %pool.id(),
            dsn = %dsn,
            max_open_conns = pool.options().pool.max_open_conns,
            force_utc = pool.options().force_utc,
            cached = pool.is_cache_managed(),
            "Tenant pool created"
        );
        Ok(pool)
    }

    /// Run one setup step under the setup deadline. On failure the handle
    /// is closed before the error is returned.
    async fn setup_step<F>(
        &self,
        handle: &C::Handle,
        setup: &RequestContext,
        tenant: &str,
        stage: SetupStage,
        step: F,
    ) -> BrokerResult<()>
    where
        F: Future<Output = Result<(), DriverError>>,
    {
        let outcome = match setup.run(step).await {
            Ok(outcome) => outcome,
            Err(DeadlineExceeded) => Err(DriverError::timeout(stage.as_str(), self.setup_timeout)),
        };

        let Err(source) = outcome else {
            return Ok(());
        };

        warn!(tenant, %stage, error = %source, "Tenant pool setup failed");
        if let Err(close_err) = handle.close() {
            warn!(tenant, error = %close_err, "Failed to release partially configured pool");
        }
        Err(BrokerError::Setup {
            tenant: tenant.to_string(),
            stage,
            source,
        })
    }
}

impl<C: PoolConnector + std::fmt::Debug> std::fmt::Debug for TenantConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnectionManager")
            .field("connector", &self.connector)
            .field("cache", &self.cache)
            .field("factories", &self.factories.len())
            .field("setup_timeout", &self.setup_timeout)
            .finish()
    }
}

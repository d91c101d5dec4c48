//! Environment configuration for a PostgreSQL-backed broker.

use std::sync::Arc;
use std::time::Duration;

use tenantdb_cache::TtlCacheConfig;
use tenantdb_core::BrokerResult;

use crate::catalog::{CatalogConfig, PgCatalog};
use crate::manager::{TenantConnectionManager, SETUP_TIMEOUT};
use crate::pool_cache::ConnectionCache;
use crate::postgres::PgConnector;

/// Manager over real PostgreSQL pools.
pub type PgTenantManager = TenantConnectionManager<PgConnector>;

/// Everything needed to stand up a [`PgTenantManager`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub catalog: CatalogConfig,
    pub cache: TtlCacheConfig,
    pub setup_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            cache: TtlCacheConfig::default(),
            setup_timeout: SETUP_TIMEOUT,
        }
    }
}

impl BrokerConfig {
    /// Load from `TENANTDB_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            catalog: CatalogConfig::from_env(),
            cache: TtlCacheConfig {
                max_cost: std::env::var("TENANTDB_CACHE_MAX_COST")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.cache.max_cost),
            },
            setup_timeout: std::env::var("TENANTDB_SETUP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.setup_timeout),
        }
    }
}

impl PgTenantManager {
    /// Build a manager with a fresh cache from `config`.
    pub fn from_config(config: &BrokerConfig) -> BrokerResult<Self> {
        let catalog = PgCatalog::from_config(&config.catalog)?;
        let cache = Arc::new(ConnectionCache::new(config.cache.clone()));
        Ok(Self::new(Arc::new(catalog), PgConnector, cache).with_setup_timeout(config.setup_timeout))
    }
}

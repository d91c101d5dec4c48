//! PostgreSQL-backed catalog resolver.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tenantdb_core::{
    BrokerResult, CatalogError, CatalogResolver, ConfigError, DriverError, TenantCredentials,
    CATALOG_LOOKUP_TIMEOUT, CATALOG_QUERY,
};
use tokio_postgres::{NoTls, Row};
use tracing::debug;

// ============================================================================
// CATALOG CONFIGURATION
// ============================================================================

/// Connection settings for the shared catalog database.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Catalog connection URL
    pub url: String,
    /// Maximum catalog pool size
    pub max_size: usize,
    /// Bound on one lookup
    pub lookup_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@localhost:5432/catalog".to_string(),
            max_size: 4,
            lookup_timeout: CATALOG_LOOKUP_TIMEOUT,
        }
    }
}

impl CatalogConfig {
    /// Load from `TENANTDB_CATALOG_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("TENANTDB_CATALOG_URL").unwrap_or(defaults.url),
            max_size: std::env::var("TENANTDB_CATALOG_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            lookup_timeout: std::env::var("TENANTDB_CATALOG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.lookup_timeout),
        }
    }

    /// Build the catalog pool. No connection is opened until first use.
    pub fn create_pool(&self) -> BrokerResult<Pool> {
        if self.url.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "TENANTDB_CATALOG_URL".to_string(),
            }
            .into());
        }

        let mut cfg = Config::new();
        cfg.url = Some(self.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .builder(NoTls)
            .map_err(|e| ConfigError::PoolBuild {
                reason: format!("Invalid catalog URL: {}", e),
            })?
            .max_size(self.max_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| ConfigError::PoolBuild {
                reason: format!("Failed to create catalog pool: {}", e),
            })?;

        Ok(pool)
    }
}

// ============================================================================
// CATALOG RESOLVER
// ============================================================================

/// Looks tenants up in the `catalog` table.
#[derive(Clone)]
pub struct PgCatalog {
    pool: Pool,
    lookup_timeout: Duration,
}

impl PgCatalog {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            lookup_timeout: CATALOG_LOOKUP_TIMEOUT,
        }
    }

    pub fn from_config(config: &CatalogConfig) -> BrokerResult<Self> {
        Ok(Self::new(config.create_pool()?).with_lookup_timeout(config.lookup_timeout))
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    async fn lookup(&self, tenant: &str) -> Result<Option<Row>, DriverError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DriverError::backend("catalog connection", e))?;
        client
            .query_opt(CATALOG_QUERY, &[&tenant])
            .await
            .map_err(|e| DriverError::backend("catalog lookup", e))
    }
}

#[async_trait]
impl CatalogResolver for PgCatalog {
    async fn resolve(&self, tenant: &str) -> Result<TenantCredentials, CatalogError> {
        let row = match tokio::time::timeout(self.lookup_timeout, self.lookup(tenant)).await {
            Ok(Ok(Some(row))) => row,
            Ok(Ok(None)) => {
                return Err(CatalogError::NotFound {
                    tenant: tenant.to_string(),
                })
            }
            Ok(Err(source)) => {
                return Err(CatalogError::Store {
                    tenant: tenant.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(CatalogError::Timeout {
                    tenant: tenant.to_string(),
                    after: self.lookup_timeout,
                })
            }
        };

        let credentials = credentials_from_row(&row).map_err(|source| CatalogError::Store {
            tenant: tenant.to_string(),
            source,
        })?;
        debug!(tenant, server = %credentials.server, "Resolved tenant from catalog");
        Ok(credentials)
    }
}

fn credentials_from_row(row: &Row) -> Result<TenantCredentials, DriverError> {
    let column = |name: &'static str| -> Result<String, DriverError> {
        row.try_get::<_, String>(name)
            .map_err(|e| DriverError::backend("decode catalog row", e))
    };

    Ok(TenantCredentials {
        driver: column("driver")?,
        user_name: column("user_name")?,
        password: column("password")?,
        server: column("server")?,
        database_name: column("database_name")?,
        schema_name: column("schema_name")?,
    })
}

impl std::fmt::Debug for PgCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgCatalog")
            .field("status", &self.pool.status())
            .field("lookup_timeout", &self.lookup_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CatalogConfig::default();
        assert_eq!(config.lookup_timeout, Duration::from_secs(5));
        assert_eq!(config.max_size, 4);
    }

    #[test]
    fn test_empty_url_rejected() {
        let config = CatalogConfig {
            url: String::new(),
            ..Default::default()
        };
        let err = config.create_pool().unwrap_err();
        assert!(err.to_string().contains("TENANTDB_CATALOG_URL"));
    }

    #[tokio::test]
    async fn test_pool_is_lazy() {
        let catalog = PgCatalog::from_config(&CatalogConfig::default()).unwrap();
        assert_eq!(catalog.pool.status().size, 0);
        assert_eq!(catalog.lookup_timeout, CATALOG_LOOKUP_TIMEOUT);
    }
}

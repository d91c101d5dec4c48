//! TenantDB Pool - Tenant Connection Manager
//!
//! Turns a tenant key into a ready, schema-scoped connection pool. Pools are
//! built from catalog credentials, pinned to the tenant's schema, optionally
//! forced to UTC, and cached process-wide under a versioned key with a TTL.
//!
//! # Example
//!
//! ```no_run
//! use tenantdb_core::{ConnectOptions, RequestContext};
//! use tenantdb_pool::{BrokerConfig, PgTenantManager};
//!
//! # async fn run() -> tenantdb_core::BrokerResult<()> {
//! let manager = PgTenantManager::from_config(&BrokerConfig::from_env())?;
//! let ctx = RequestContext::background().with_tenant("acme");
//!
//! let pool = manager.get_connection(&ctx, ConnectOptions::new("acme")).await?;
//! let rows = pool.query_with_log(&ctx, "SELECT id FROM orders", &[]).await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod factory;
pub mod manager;
pub mod pool_cache;
pub mod postgres;
pub mod telemetry;
pub mod tenant_pool;

pub use catalog::{CatalogConfig, PgCatalog};
pub use config::{BrokerConfig, PgTenantManager};
pub use factory::{FactoryRegistry, PoolFactory};
pub use manager::{PoolOf, TenantConnectionManager, SETUP_TIMEOUT};
pub use pool_cache::{ConnectionCache, POOL_ENTRY_COST};
pub use postgres::{PgConnector, PgPoolHandle};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use tenant_pool::{LoggedRow, TenantPool};

//! TenantDB Core - Types and Seams
//!
//! Pure data types and the traits the connection broker is built on. The
//! catalog lookup and the SQL pool are external collaborators reached only
//! through [`CatalogResolver`], [`PoolConnector`] and [`PoolHandle`].

pub mod catalog;
pub mod context;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod health;
pub mod logging;
pub mod options;

pub use catalog::{CatalogResolver, CATALOG_LOOKUP_TIMEOUT, CATALOG_QUERY};
pub use context::{DeadlineExceeded, RequestContext, TenantKey};
pub use credentials::{
    quote_identifier, search_path_statement, ConnectionString, TenantCredentials,
    SET_TIMEZONE_UTC,
};
pub use driver::{PoolConnector, PoolHandle, PoolStatus};
pub use error::{
    BoxError, BrokerError, BrokerResult, CatalogError, ConfigError, DriverError, FactoryError,
    SetupStage, ValidationError,
};
pub use health::{HealthCheck, HealthStatus};
pub use logging::{default_query_logger, noop_query_logger, QueryLogger, SqlParams};
pub use options::{
    ConnectOptions, PoolSettings, ResolvedOptions, DEFAULT_CACHE_TTL, DEFAULT_CONN_MAX_IDLE,
    DEFAULT_CONN_MAX_LIFETIME, DEFAULT_MAX_IDLE_CONNS, DEFAULT_MAX_OPEN_CONNS,
};

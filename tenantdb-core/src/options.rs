//! Per-request connection options and their defaults

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ValidationError;
use crate::logging::QueryLogger;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default maximum number of open connections per tenant pool.
pub const DEFAULT_MAX_OPEN_CONNS: usize = 25;

/// Default maximum number of idle connections per tenant pool.
pub const DEFAULT_MAX_IDLE_CONNS: usize = 25;

/// Default idle timeout for a pooled connection (1 hour).
pub const DEFAULT_CONN_MAX_IDLE: Duration = Duration::from_secs(60 * 60);

/// Default maximum lifetime for a pooled connection (1 hour).
pub const DEFAULT_CONN_MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Default cache TTL for a tenant pool (55 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(55 * 60);

// ============================================================================
// CONNECT OPTIONS
// ============================================================================

/// Options for obtaining a tenant pool.
///
/// Zero-valued numeric and duration fields take the defaults above when the
/// options are resolved. `cache_enabled` is `None` unless the caller has an
/// opinion; only `Some(false)` disables caching.
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Tenant key (required).
    pub tenant: String,
    pub max_open_conns: usize,
    pub max_idle_conns: usize,
    pub conn_max_idle: Duration,
    pub conn_max_lifetime: Duration,
    /// Issue `SET TIMEZONE='UTC'` on every connection.
    pub force_utc: bool,
    /// Hook called before each logged statement; the process default if unset.
    pub query_logger: Option<QueryLogger>,
    pub cache_enabled: Option<bool>,
    pub cache_ttl: Duration,
}

impl ConnectOptions {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Default::default()
        }
    }

    pub fn with_max_open_conns(mut self, max: usize) -> Self {
        self.max_open_conns = max;
        self
    }

    pub fn with_max_idle_conns(mut self, max: usize) -> Self {
        self.max_idle_conns = max;
        self
    }

    pub fn with_conn_max_idle(mut self, idle: Duration) -> Self {
        self.conn_max_idle = idle;
        self
    }

    pub fn with_conn_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.conn_max_lifetime = lifetime;
        self
    }

    pub fn with_force_utc(mut self, force: bool) -> Self {
        self.force_utc = force;
        self
    }

    pub fn with_query_logger(mut self, logger: QueryLogger) -> Self {
        self.query_logger = Some(logger);
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Validate the tenant and apply defaults for every unset field.
    pub fn resolve(self) -> Result<ResolvedOptions, ValidationError> {
        if self.tenant.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "tenant".to_string(),
            });
        }

        Ok(ResolvedOptions {
            pool: self.pool_settings(),
            tenant: self.tenant,
            force_utc: self.force_utc,
            query_logger: self.query_logger,
            cache_enabled: self.cache_enabled.unwrap_or(true),
            cache_ttl: or_default_duration(self.cache_ttl, DEFAULT_CACHE_TTL),
        })
    }
}

impl ConnectOptions {
    /// Pool limits with defaults applied to unset fields.
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_open_conns: or_default(self.max_open_conns, DEFAULT_MAX_OPEN_CONNS),
            max_idle_conns: or_default(self.max_idle_conns, DEFAULT_MAX_IDLE_CONNS),
            conn_max_idle: or_default_duration(self.conn_max_idle, DEFAULT_CONN_MAX_IDLE),
            conn_max_lifetime: or_default_duration(
                self.conn_max_lifetime,
                DEFAULT_CONN_MAX_LIFETIME,
            ),
        }
    }
}

fn or_default(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}

fn or_default_duration(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("tenant", &self.tenant)
            .field("max_open_conns", &self.max_open_conns)
            .field("max_idle_conns", &self.max_idle_conns)
            .field("conn_max_idle", &self.conn_max_idle)
            .field("conn_max_lifetime", &self.conn_max_lifetime)
            .field("force_utc", &self.force_utc)
            .field("query_logger", &self.query_logger.is_some())
            .field("cache_enabled", &self.cache_enabled)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

// ============================================================================
// RESOLVED OPTIONS
// ============================================================================

/// Pool limits handed to the driver when a tenant pool is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    pub max_open_conns: usize,
    pub max_idle_conns: usize,
    pub conn_max_idle: Duration,
    pub conn_max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open_conns: DEFAULT_MAX_OPEN_CONNS,
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            conn_max_idle: DEFAULT_CONN_MAX_IDLE,
            conn_max_lifetime: DEFAULT_CONN_MAX_LIFETIME,
        }
    }
}

/// Options after validation and default resolution. Never mutated afterwards.
#[derive(Clone)]
pub struct ResolvedOptions {
    pub tenant: String,
    pub pool: PoolSettings,
    pub force_utc: bool,
    pub query_logger: Option<QueryLogger>,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
}

impl fmt::Debug for ResolvedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOptions")
            .field("tenant", &self.tenant)
            .field("pool", &self.pool)
            .field("force_utc", &self.force_utc)
            .field("query_logger", &self.query_logger.is_some())
            .field("cache_enabled", &self.cache_enabled)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_applied_for_zero_fields() {
        let resolved = ConnectOptions::new("x").resolve().unwrap();
        assert_eq!(resolved.tenant, "x");
        assert_eq!(resolved.pool.max_open_conns, 25);
        assert_eq!(resolved.pool.max_idle_conns, 25);
        assert_eq!(resolved.pool.conn_max_idle, Duration::from_secs(3600));
        assert_eq!(resolved.pool.conn_max_lifetime, Duration::from_secs(3600));
        assert_eq!(resolved.cache_ttl, Duration::from_secs(55 * 60));
        assert!(resolved.cache_enabled);
        assert!(!resolved.force_utc);
        assert!(resolved.query_logger.is_none());
    }

    #[test]
    fn test_empty_tenant_rejected() {
        let err = ConnectOptions::default().resolve().unwrap_err();
        assert_eq!(
            err,
            ValidationError::RequiredFieldMissing {
                field: "tenant".to_string()
            }
        );
    }

    #[test]
    fn test_cache_can_be_disabled_explicitly() {
        let resolved = ConnectOptions::new("x").with_cache(false).resolve().unwrap();
        assert!(!resolved.cache_enabled);
        assert_eq!(resolved.cache_ttl, DEFAULT_CACHE_TTL);
    }

    #[test]
    fn test_explicit_values_preserved() {
        let resolved = ConnectOptions::new("tenant_avancado")
            .with_max_open_conns(50)
            .with_max_idle_conns(10)
            .with_conn_max_idle(Duration::from_secs(30 * 60))
            .with_conn_max_lifetime(Duration::from_secs(2 * 3600))
            .with_force_utc(true)
            .with_cache_ttl(Duration::from_secs(3600))
            .resolve()
            .unwrap();

        assert_eq!(resolved.pool.max_open_conns, 50);
        assert_eq!(resolved.pool.max_idle_conns, 10);
        assert_eq!(resolved.pool.conn_max_idle, Duration::from_secs(1800));
        assert_eq!(resolved.pool.conn_max_lifetime, Duration::from_secs(7200));
        assert!(resolved.force_utc);
        assert_eq!(resolved.cache_ttl, Duration::from_secs(3600));
    }

    proptest! {
        #[test]
        fn prop_resolved_fields_never_zero(
            tenant in "[a-z][a-z0-9_]{0,15}",
            max_open in 0usize..200,
            max_idle in 0usize..200,
            idle_secs in 0u64..10_000,
            ttl_secs in 0u64..10_000,
        ) {
            let resolved = ConnectOptions::new(tenant.clone())
                .with_max_open_conns(max_open)
                .with_max_idle_conns(max_idle)
                .with_conn_max_idle(Duration::from_secs(idle_secs))
                .with_cache_ttl(Duration::from_secs(ttl_secs))
                .resolve()
                .unwrap();

            prop_assert_eq!(resolved.tenant, tenant);
            prop_assert!(resolved.pool.max_open_conns > 0);
            prop_assert!(resolved.pool.max_idle_conns > 0);
            prop_assert!(!resolved.pool.conn_max_idle.is_zero());
            prop_assert!(!resolved.cache_ttl.is_zero());
            if max_open > 0 {
                prop_assert_eq!(resolved.pool.max_open_conns, max_open);
            }
            if ttl_secs > 0 {
                prop_assert_eq!(resolved.cache_ttl, Duration::from_secs(ttl_secs));
            }
        }
    }
}

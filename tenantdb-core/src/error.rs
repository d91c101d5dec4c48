//! Error types for TenantDB operations

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used to carry driver-specific failures across crate seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Validation errors, reported before any I/O is attempted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Tenant not found in request context")]
    TenantNotInContext,
}

/// Catalog resolution errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No catalog row matches the tenant key.
    #[error("record not found: tenant {tenant}")]
    NotFound { tenant: String },

    #[error("Catalog lookup for tenant {tenant} timed out after {after:?}")]
    Timeout { tenant: String, after: Duration },

    #[error("Catalog store error for tenant {tenant}: {source}")]
    Store {
        tenant: String,
        #[source]
        source: DriverError,
    },
}

/// Errors surfaced by the SQL driver or pool primitives.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Connection pool is closed")]
    Closed,

    #[error("Invalid connection configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl DriverError {
    /// Wrap a driver-level error raised while performing `operation`.
    pub fn backend(operation: &'static str, source: impl Into<BoxError>) -> Self {
        DriverError::Backend {
            operation,
            source: source.into(),
        }
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        DriverError::Timeout { operation, after }
    }
}

/// Errors raised by the pool factory adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FactoryError {
    #[error("No factory registered for {type_name}; register one at startup")]
    NotRegistered { type_name: &'static str },

    #[error("Factory type mismatch: requested {requested}, registered {registered:?}")]
    TypeMismatch {
        requested: &'static str,
        registered: Vec<&'static str>,
    },

    #[error("A factory for {type_name} is already registered")]
    AlreadyRegistered { type_name: &'static str },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to build pool: {reason}")]
    PoolBuild { reason: String },
}

/// The step of tenant pool setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupStage {
    Open,
    Ping,
    SearchPath,
    Timezone,
    FinalValidation,
}

impl SetupStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupStage::Open => "open",
            SetupStage::Ping => "ping",
            SetupStage::SearchPath => "set search_path",
            SetupStage::Timezone => "set timezone",
            SetupStage::FinalValidation => "final connection validation",
        }
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Master error type for all TenantDB errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to get tenant info: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Connection setup failed for tenant {tenant} during {stage}: {source}")]
    Setup {
        tenant: String,
        stage: SetupStage,
        #[source]
        source: DriverError,
    },

    #[error("Connection is closed or invalid for tenant {tenant}")]
    PoolClosed { tenant: String },

    #[error("Statement failed for tenant {tenant}: {source}")]
    Statement {
        tenant: String,
        #[source]
        source: DriverError,
    },

    #[error("Closing pool for tenant {tenant} failed: {source}")]
    Close {
        tenant: String,
        #[source]
        source: DriverError,
    },

    #[error("Factory error: {0}")]
    Factory(#[from] FactoryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl BrokerError {
    /// True when the tenant has no catalog row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::Catalog(CatalogError::NotFound { .. }))
    }

    /// True when the operation hit a pool that was already closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, BrokerError::PoolClosed { .. })
    }
}

/// Result type alias for TenantDB operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

// =============================================================================
// TESTS
// =============================================================================

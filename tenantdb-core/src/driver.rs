//! Driver seams
//!
//! The broker configures and validates pools but never reimplements them. A
//! [`PoolConnector`] opens a [`PoolHandle`] from a DSN; everything the broker
//! does to a pool afterwards goes through the handle.

use async_trait::async_trait;
use postgres_types::ToSql;
use serde::{Deserialize, Serialize};

use crate::credentials::ConnectionString;
use crate::error::DriverError;
use crate::options::PoolSettings;

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Connections currently open (idle + in use).
    pub size: usize,
    /// Idle connections ready for checkout.
    pub available: usize,
}

/// A live connection pool for one tenant.
#[async_trait]
pub trait PoolHandle: Send + Sync + 'static {
    /// Row type returned by queries.
    type Row: Send + 'static;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), DriverError>;

    /// Apply a session-level statement to every connection this pool hands
    /// out, validating it on a fresh connection before returning.
    async fn apply_session(&self, statement: &str) -> Result<(), DriverError>;

    /// Execute a statement, returning the number of affected rows.
    async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DriverError>;

    async fn query(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Self::Row>, DriverError>;

    /// Run a query expected to return exactly one row.
    async fn query_one(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Self::Row, DriverError>;

    /// Close the pool. Outstanding checkouts are released as they return.
    fn close(&self) -> Result<(), DriverError>;

    fn status(&self) -> PoolStatus;
}

/// Opens tenant pools.
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    type Handle: PoolHandle;

    /// Open a pool for `dsn` configured with `settings`. Implementations may
    /// connect lazily; the broker probes liveness itself.
    async fn open(
        &self,
        dsn: &ConnectionString,
        settings: &PoolSettings,
    ) -> Result<Self::Handle, DriverError>;
}

//! Catalog resolution seam

use async_trait::async_trait;
use std::time::Duration;

use crate::credentials::TenantCredentials;
use crate::error::CatalogError;

/// Fixed upper bound on a single catalog lookup, independent of the caller.
pub const CATALOG_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-row lookup against the shared `catalog` table.
pub const CATALOG_QUERY: &str = "SELECT driver, user_name, password, server, database_name, schema_name \
     FROM catalog \
     WHERE schema_name = $1 \
     LIMIT 1";

/// Maps a tenant key to its connection credentials.
///
/// Implementations must return [`CatalogError::NotFound`] when no row matches
/// and must bound the lookup by their own timeout.
#[async_trait]
pub trait CatalogResolver: Send + Sync {
    async fn resolve(&self, tenant: &str) -> Result<TenantCredentials, CatalogError>;
}

//! Health check types for tenant pools

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health status for a tenant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Probe succeeded
    Healthy,
    /// Probe failed or timed out
    Unhealthy,
    /// Pool has been closed
    Closed,
}

/// Result of probing one tenant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    /// Tenant key the pool belongs to
    pub tenant: String,
    pub message: Option<String>,
    /// Probe round trip in milliseconds
    pub response_time_ms: Option<i64>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl HealthCheck {
    pub fn healthy(tenant: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            tenant: tenant.into(),
            message: None,
            response_time_ms: None,
            metadata: None,
        }
    }

    pub fn unhealthy(tenant: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            tenant: tenant.into(),
            message: Some(message.into()),
            response_time_ms: None,
            metadata: None,
        }
    }

    pub fn closed(tenant: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Closed,
            tenant: tenant.into(),
            message: Some("pool is closed".to_string()),
            response_time_ms: None,
            metadata: None,
        }
    }

    pub fn with_response_time(mut self, ms: i64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

//! Tracing subscriber initialization.

use std::str::FromStr;

use tenantdb_core::{BrokerResult, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Human-readable, for local development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ConfigError::InvalidValue {
                field: "TENANTDB_LOG_FORMAT".to_string(),
                value: other.to_string(),
                reason: "expected json or pretty".to_string(),
            }),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            default_filter: "tenantdb=info,tenantdb_pool=info,tenantdb_cache=warn,warn".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> BrokerResult<Self> {
        let mut config = Self::default();
        if let Ok(format) = std::env::var("TENANTDB_LOG_FORMAT") {
            config.log_format = format.parse()?;
        }
        Ok(config)
    }
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_tracing(config: &TelemetryConfig) -> BrokerResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ConfigError::InvalidValue {
        field: "tracing subscriber".to_string(),
        value: format!("{:?}", config.log_format),
        reason: e.to_string(),
    })?;

    tracing::info!(log_format = ?config.log_format, "Telemetry initialized");
    Ok(())
}

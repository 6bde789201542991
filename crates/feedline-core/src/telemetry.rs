//! Logging initialisation.
//!
//! Installs a `tracing` subscriber with an `EnvFilter` and a `fmt` layer.
//! The output format is either JSON (for log shipping) or human-readable.

#[cfg(feature = "telemetry")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::FeedResult;
use serde::{Deserialize, Serialize};

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Multi-line, coloured output for local development.
    #[default]
    Pretty,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is absent.
    #[must_use]
    pub fn default_directive(&self) -> String {
        format!("{},feedline=debug", self.log_level)
    }
}

/// Initialize the global tracing subscriber.
#[cfg(feature = "telemetry")]
pub fn init_telemetry(config: &TelemetryConfig) -> FeedResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .try_init(),
    };

    result.map_err(|e| crate::FeedError::internal(format!("Failed to install subscriber: {e}")))?;

    tracing::info!(
        log_level = %config.log_level,
        log_format = ?config.log_format,
        "Telemetry initialized"
    );

    Ok(())
}

/// Placeholder for when telemetry feature is disabled.
#[cfg(not(feature = "telemetry"))]
pub fn init_telemetry(_config: &TelemetryConfig) -> FeedResult<()> {
    Ok(())
}

//! Server startup utilities.

use feedline_config::{AppConfig, ObservabilityConfig};
use feedline_core::{FeedError, FeedResult};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
    ______              ____ _
   / ____/__  ___  ____/ / /(_)___  ___
  / /_  / _ \/ _ \/ __  / / / / __ \/ _ \
 / __/ /  __/  __/ /_/ / / / / / / /  __/
/_/    \___/\___/\__,_/_/_/_/_/ /_/\___/
    "#);
}

/// Prints where the instance keeps its state.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Environment:   {}", config.app.environment);
    info!(
        "Cache:         {}",
        if config.redis.enabled { "redis" } else { "in-process" }
    );
    info!("Feed size:     {} posts", config.feed.posts_in_feed);
    info!("Page size:     {} posts", config.feed.page_size);
    if config.observability.metrics_enabled {
        info!("Metrics:       http://{}/metrics", config.observability.metrics_addr);
    }
    info!("{}", separator);
}

/// Installs the Prometheus exporter and describes every metric.
pub fn install_metrics(config: &ObservabilityConfig) -> FeedResult<()> {
    if !config.metrics_enabled {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr: SocketAddr = config.metrics_addr.parse().map_err(|e| {
        FeedError::Configuration(format!("Invalid metrics address '{}': {e}", config.metrics_addr))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| FeedError::internal(format!("Failed to install metrics exporter: {e}")))?;

    feedline_cache::metrics::register_metrics();
    feedline_events::register_metrics();
    feedline_service::register_metrics();

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let config = ObservabilityConfig {
            metrics_enabled: false,
            metrics_addr: "not an address".to_string(),
            ..ObservabilityConfig::default()
        };
        assert!(install_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_metrics_address_is_rejected() {
        let config = ObservabilityConfig {
            metrics_addr: "not an address".to_string(),
            ..ObservabilityConfig::default()
        };
        let err = install_metrics(&config).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_print_startup_info_does_not_panic() {
        print_banner();
        print_startup_info(&AppConfig::default());
    }
}

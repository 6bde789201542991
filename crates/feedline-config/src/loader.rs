//! Configuration loader with layered sources.

use crate::{format_validation_errors, AppConfig, ConfigValidator};
use config::{Config, ConfigError, Environment, File};
use feedline_core::FeedError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `FEEDLINE_` prefix and `__` separator
    pub fn new(config_dir: impl Into<String>) -> Result<Self, FeedError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, FeedError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), FeedError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &str) -> Result<AppConfig, FeedError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("FEEDLINE_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{config_dir}/{name}.toml");
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("FEEDLINE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_feed_error)?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_feed_error)?;

        ConfigValidator::validate(&app_config)
            .map_err(|errors| FeedError::Configuration(format_validation_errors(&errors)))?;

        Ok(app_config)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn config_error_to_feed_error(err: ConfigError) -> FeedError {
    FeedError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_loads_default_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
[feed]
posts_in_feed = 50
page_size = 10

[cache]
key_prefix = "test"
"#,
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy().to_string()).unwrap();
        let config = loader.get().await;

        assert_eq!(config.feed.posts_in_feed, 50);
        assert_eq!(config.feed.page_size, 10);
        // untouched keys keep their defaults
        assert_eq!(config.feed.comments_in_post, 3);
        assert_eq!(config.cache.key_prefix, "test");
        assert_eq!(config.cache.lock_wait_ms, 10_000);
    }

    #[tokio::test]
    async fn test_local_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[feed]\npage_size = 10\n").unwrap();
        fs::write(dir.path().join("local.toml"), "[feed]\npage_size = 5\n").unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy().to_string()).unwrap();
        assert_eq!(loader.get().await.feed.page_size, 5);
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[feed]\npage_size = 0\n").unwrap();

        let result = ConfigLoader::new(dir.path().to_string_lossy().to_string());
        assert!(matches!(result, Err(FeedError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.toml");
        fs::write(&path, "[heater]\nevent_batch_size = 10\n").unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy().to_string()).unwrap();
        assert_eq!(loader.get().await.heater.event_batch_size, 10);

        fs::write(&path, "[heater]\nevent_batch_size = 25\n").unwrap();
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.heater.event_batch_size, 25);
    }
}

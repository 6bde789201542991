//! Configuration validation module.
//!
//! Checks every section up front and reports all violations at once, so a
//! bad deployment fails at startup rather than on the first feed request.

use crate::AppConfig;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// A size or count must be at least one.
    NonPositiveSize { name: String },
    /// Pool size configuration is invalid (min must be <= max).
    InvalidPoolSize { min: u32, max: u32 },
    /// Pool size exceeds maximum allowed.
    PoolSizeTooLarge { value: usize, maximum: usize },
    /// Page size cannot exceed the feed capacity.
    PageLargerThanFeed { page_size: usize, posts_in_feed: usize },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String },
    /// Cron expression does not parse.
    InvalidCron { name: String, message: String },
    /// Log level is invalid.
    InvalidLogLevel { value: String },
    /// Key prefix must not be empty.
    EmptyKeyPrefix { name: String },
    /// Redelivery backoff would shrink or exceed its own delay.
    InvalidRedelivery { message: String },
    /// Abandoned deliveries would be reclaimed while their handler may still run.
    StaleBeforeHandlerTimeout { stale_after_secs: u64, handler_timeout_secs: u64 },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveSize { name } => write!(f, "'{name}' must be at least 1"),
            Self::InvalidPoolSize { min, max } => {
                write!(
                    f,
                    "Invalid pool size: min ({min}) cannot be greater than max ({max})"
                )
            }
            Self::PoolSizeTooLarge { value, maximum } => {
                write!(f, "Pool size {value} exceeds maximum allowed ({maximum})")
            }
            Self::PageLargerThanFeed {
                page_size,
                posts_in_feed,
            } => {
                write!(
                    f,
                    "feed.page_size ({page_size}) cannot exceed feed.posts_in_feed ({posts_in_feed})"
                )
            }
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {url_type} URL: {message}")
            }
            Self::NonPositiveTimeout { name } => write!(f, "Timeout '{name}' must be positive"),
            Self::InvalidCron { name, message } => {
                write!(f, "Invalid cron expression for '{name}': {message}")
            }
            Self::InvalidLogLevel { value } => {
                write!(
                    f,
                    "Invalid log level: '{value}' (valid: trace, debug, info, warn, error)"
                )
            }
            Self::EmptyKeyPrefix { name } => write!(f, "Key prefix '{name}' cannot be empty"),
            Self::InvalidRedelivery { message } => write!(f, "Invalid events.redelivery: {message}"),
            Self::StaleBeforeHandlerTimeout {
                stale_after_secs,
                handler_timeout_secs,
            } => write!(
                f,
                "events.consumer.stale_after_secs ({stale_after_secs}) must exceed handler_timeout_secs ({handler_timeout_secs})"
            ),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection or task pool size.
    const MAX_POOL_SIZE: usize = 1000;
    /// Valid log levels.
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_database(config, &mut errors);
        Self::validate_redis(config, &mut errors);
        Self::validate_user_service(config, &mut errors);
        Self::validate_feed(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_schedules(config, &mut errors);
        Self::validate_pools(config, &mut errors);
        Self::validate_redelivery(config, &mut errors);
        Self::validate_observability(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_database(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let db = &config.database;
        if !db.url.starts_with("mysql://") {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "database".to_string(),
                message: "URL must start with mysql://".to_string(),
            });
        }
        if db.min_connections > db.max_connections {
            errors.push(ConfigValidationError::InvalidPoolSize {
                min: db.min_connections,
                max: db.max_connections,
            });
        }
        if db.connect_timeout_secs == 0 {
            errors.push(timeout("database.connect_timeout_secs"));
        }
    }

    fn validate_redis(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let redis = &config.redis;
        if !redis.enabled {
            return;
        }
        if !redis.url.starts_with("redis://") && !redis.url.starts_with("rediss://") {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL must start with redis:// or rediss://".to_string(),
            });
        }
        if redis.pool_size == 0 {
            errors.push(size("redis.pool_size"));
        } else if redis.pool_size > Self::MAX_POOL_SIZE {
            errors.push(ConfigValidationError::PoolSizeTooLarge {
                value: redis.pool_size,
                maximum: Self::MAX_POOL_SIZE,
            });
        }
    }

    fn validate_user_service(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let users = &config.user_service;
        if let Err(e) = Url::parse(&users.base_url) {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "user_service".to_string(),
                message: format!("{}: {e}", users.base_url),
            });
        }
        if users.timeout_secs == 0 {
            errors.push(timeout("user_service.timeout_secs"));
        }
    }

    fn validate_feed(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let feed = &config.feed;
        if feed.posts_in_feed == 0 {
            errors.push(size("feed.posts_in_feed"));
        }
        if feed.page_size == 0 {
            errors.push(size("feed.page_size"));
        }
        if feed.posts_in_feed > 0 && feed.page_size > feed.posts_in_feed {
            errors.push(ConfigValidationError::PageLargerThanFeed {
                page_size: feed.page_size,
                posts_in_feed: feed.posts_in_feed,
            });
        }
    }

    fn validate_cache(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let cache = &config.cache;
        if cache.key_prefix.is_empty() {
            errors.push(ConfigValidationError::EmptyKeyPrefix {
                name: "cache.key_prefix".to_string(),
            });
        }
        if config.events.key_prefix.is_empty() {
            errors.push(ConfigValidationError::EmptyKeyPrefix {
                name: "events.key_prefix".to_string(),
            });
        }
        for (name, value) in [
            ("cache.posts_ttl_hours", cache.posts_ttl_hours),
            ("cache.users_ttl_hours", cache.users_ttl_hours),
            ("cache.feeds_ttl_hours", cache.feeds_ttl_hours),
            ("cache.lock_wait_ms", cache.lock_wait_ms),
            ("cache.lock_hold_ms", cache.lock_hold_ms),
            ("cache.dedup_ttl_secs", cache.dedup_ttl_secs),
            ("events.consumer.handler_timeout_secs", config.events.consumer.handler_timeout_secs),
            ("events.consumer.recover_interval_secs", config.events.consumer.recover_interval_secs),
        ] {
            if value == 0 {
                errors.push(timeout(name));
            }
        }
    }

    fn validate_schedules(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.heater.enabled {
            check_cron("heater.cron", &config.heater.cron, errors);
        }
        if config.reclaimer.enabled {
            check_cron("reclaimer.cron", &config.reclaimer.cron, errors);
        }
        if config.heater.event_batch_size == 0 {
            errors.push(size("heater.event_batch_size"));
        }
        if config.reclaimer.batch_size == 0 {
            errors.push(size("reclaimer.batch_size"));
        }
    }

    fn validate_pools(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        for (name, value) in [
            ("pools.fanout_concurrency", config.pools.fanout_concurrency),
            ("pools.maintenance_concurrency", config.pools.maintenance_concurrency),
        ] {
            if value == 0 {
                errors.push(size(name));
            } else if value > Self::MAX_POOL_SIZE {
                errors.push(ConfigValidationError::PoolSizeTooLarge {
                    value,
                    maximum: Self::MAX_POOL_SIZE,
                });
            }
        }
    }

    fn validate_redelivery(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let consumer = &config.events.consumer;
        if consumer.stale_after_secs <= consumer.handler_timeout_secs {
            errors.push(ConfigValidationError::StaleBeforeHandlerTimeout {
                stale_after_secs: consumer.stale_after_secs,
                handler_timeout_secs: consumer.handler_timeout_secs,
            });
        }

        let redelivery = &config.events.redelivery;
        if redelivery.factor < 1.0 {
            errors.push(ConfigValidationError::InvalidRedelivery {
                message: format!("factor {} is below 1.0", redelivery.factor),
            });
        }
        if !(0.0..=1.0).contains(&redelivery.jitter) {
            errors.push(ConfigValidationError::InvalidRedelivery {
                message: format!("jitter {} is outside 0.0..=1.0", redelivery.jitter),
            });
        }
        if redelivery.base_delay_ms > redelivery.max_delay_ms {
            errors.push(ConfigValidationError::InvalidRedelivery {
                message: format!(
                    "base_delay_ms ({}) exceeds max_delay_ms ({})",
                    redelivery.base_delay_ms, redelivery.max_delay_ms
                ),
            });
        }
    }

    fn validate_observability(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let level = config.observability.log_level.to_lowercase();
        if !Self::VALID_LOG_LEVELS.contains(&level.as_str()) {
            errors.push(ConfigValidationError::InvalidLogLevel {
                value: config.observability.log_level.clone(),
            });
        }
    }
}

fn size(name: &str) -> ConfigValidationError {
    ConfigValidationError::NonPositiveSize {
        name: name.to_string(),
    }
}

fn timeout(name: &str) -> ConfigValidationError {
    ConfigValidationError::NonPositiveTimeout {
        name: name.to_string(),
    }
}

fn check_cron(name: &str, expression: &str, errors: &mut Vec<ConfigValidationError>) {
    if let Err(e) = cron::Schedule::from_str(expression) {
        errors.push(ConfigValidationError::InvalidCron {
            name: name.to_string(),
            message: e.to_string(),
        });
    }
}

/// Formats validation errors for display.
#[must_use]
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_feed_capacity() {
        let mut config = AppConfig::default();
        config.feed.posts_in_feed = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigValidationError::NonPositiveSize { name } if name == "feed.posts_in_feed"
        )));
    }

    #[test]
    fn test_page_larger_than_feed() {
        let mut config = AppConfig::default();
        config.feed.posts_in_feed = 10;
        config.feed.page_size = 20;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ConfigValidationError::PageLargerThanFeed {
                page_size: 20,
                posts_in_feed: 10
            }]
        );
    }

    #[test]
    fn test_invalid_cron() {
        let mut config = AppConfig::default();
        config.heater.cron = "every six hours".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigValidationError::InvalidCron { name, .. } if name == "heater.cron"
        )));
    }

    #[test]
    fn test_disabled_schedule_skips_cron_check() {
        let mut config = AppConfig::default();
        config.reclaimer.enabled = false;
        config.reclaimer.cron = "nonsense".to_string();

        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_lock_timeouts() {
        let mut config = AppConfig::default();
        config.cache.lock_wait_ms = 0;
        config.cache.lock_hold_ms = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_redis_checks_skipped_when_disabled() {
        let mut config = AppConfig::default();
        config.redis.enabled = false;
        config.redis.url = "not-a-url".to_string();

        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_shrinking_redelivery_rejected() {
        let mut config = AppConfig::default();
        config.events.redelivery.factor = 0.5;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ConfigValidationError::InvalidRedelivery { .. }]
        ));
    }

    #[test]
    fn test_stale_threshold_within_handler_timeout_rejected() {
        let mut config = AppConfig::default();
        config.events.consumer.stale_after_secs = config.events.consumer.handler_timeout_secs;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ConfigValidationError::StaleBeforeHandlerTimeout { .. }]
        ));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = AppConfig::default();
        config.database.url = "postgres://x".to_string();
        config.observability.log_level = "loud".to_string();
        config.user_service.base_url = "::".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);

        let message = format_validation_errors(&errors);
        assert!(message.contains("1."));
        assert!(message.contains("loud"));
    }
}

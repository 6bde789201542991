//! Redis connection pool.

use deadpool_redis::{Config, Pool, Runtime};
use feedline_config::RedisConfig;
use feedline_core::{FeedError, FeedResult};
use tracing::info;

/// Create a Redis connection pool and check that the server answers.
pub async fn create_pool(config: &RedisConfig) -> FeedResult<Pool> {
    info!("Creating Redis connection pool...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| FeedError::Configuration(format!("Invalid Redis config: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| FeedError::Configuration(format!("Failed to create pool: {e}")))?;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| FeedError::Cache(format!("Failed to get Redis connection: {e}")))?;
    redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await
        .map_err(|e| FeedError::Cache(format!("Redis did not answer PING: {e}")))?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

//! Application wiring.
//!
//! ```text
//! Backends (Redis or memory) ─┐
//! Stores (MySQL, identity)  ──┼─► services ─► consumers ─► worker pools
//!                             └─► scheduler (cron triggers)
//! ```

use feedline_cache::{
    create_pool as create_redis_pool, CacheBackend, CacheKeys, EventDeduplicator, LocalLocker,
    Locker, MemoryCacheBackend, MemoryEventDeduplicator, RedisCacheBackend, RedisEventDeduplicator,
    RedisLocker,
};
use feedline_config::AppConfig;
use feedline_core::FeedResult;
use feedline_events::messages::{ReclaimCache, StartCacheHeat};
use feedline_events::{
    Coordination, EventBus, EventPublisher, MemoryEventBus, RedisEventBus, Scheduler, WorkerPool,
};
use feedline_repository::{
    create_pool as create_db_pool, CommentStore, DatabasePool, HttpUserDirectory,
    MySqlCommentStore, MySqlPostStore, PostStore, UserDirectory,
};
use feedline_service::{
    fanout_pool_config, maintenance_pool_config, CacheHeater, CacheReclaimer, EventConsumers,
    FeedAssembler, FeedCaches, PostCacheService, TaskPool,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shared infrastructure: cache storage, locking, event claims and the bus.
pub struct Backends {
    pub cache: Arc<dyn CacheBackend>,
    pub locker: Arc<dyn Locker>,
    pub dedup: Arc<dyn EventDeduplicator>,
    pub bus: Arc<dyn EventBus>,
    pub publisher: Arc<dyn EventPublisher>,
    pub coordination: Coordination,
}

impl Backends {
    /// Redis-backed infrastructure when `redis.enabled`, in-process otherwise.
    pub async fn connect(config: &AppConfig) -> FeedResult<Self> {
        if !config.redis.enabled {
            info!("Redis disabled, using in-process cache, locks and event bus");
            return Ok(Self::in_memory(config));
        }

        let pool = Arc::new(create_redis_pool(&config.redis).await?);
        let bus = Arc::new(RedisEventBus::new(Arc::clone(&pool), &config.events));

        Ok(Self {
            cache: Arc::new(RedisCacheBackend::new(Arc::clone(&pool))),
            locker: Arc::new(RedisLocker::new(Arc::clone(&pool))),
            dedup: Arc::new(RedisEventDeduplicator::new(
                Arc::clone(&pool),
                CacheKeys::new(&config.cache.key_prefix),
                config.cache.dedup_ttl(),
            )),
            bus: bus.clone(),
            publisher: bus,
            coordination: Coordination::Redis(pool),
        })
    }

    /// Single-process infrastructure; nothing is shared with other instances.
    #[must_use]
    pub fn in_memory(config: &AppConfig) -> Self {
        let bus = Arc::new(MemoryEventBus::new(&config.events));
        Self {
            cache: Arc::new(MemoryCacheBackend::new()),
            locker: Arc::new(LocalLocker::new()),
            dedup: Arc::new(MemoryEventDeduplicator::new(config.cache.dedup_ttl())),
            bus: bus.clone(),
            publisher: bus,
            coordination: Coordination::Local,
        }
    }
}

/// Sources of truth behind the caches.
pub struct Stores {
    pub directory: Arc<dyn UserDirectory>,
    pub posts: Arc<dyn PostStore>,
    pub comments: Arc<dyn CommentStore>,
}

impl Stores {
    /// MySQL stores and the HTTP identity directory.
    pub fn connect(config: &AppConfig, db: Arc<DatabasePool>) -> FeedResult<Self> {
        Ok(Self {
            directory: Arc::new(HttpUserDirectory::new(&config.user_service)?),
            posts: Arc::new(MySqlPostStore::new(Arc::clone(&db))),
            comments: Arc::new(MySqlCommentStore::new(db)),
        })
    }
}

/// Registers the heating and reclamation triggers that are enabled.
pub fn schedule_maintenance(scheduler: &Scheduler, config: &AppConfig) -> FeedResult<()> {
    if config.heater.enabled {
        scheduler.schedule("cache-heat", &config.heater.cron, StartCacheHeat::default)?;
    }
    if config.reclaimer.enabled {
        scheduler.schedule("cache-reclaim", &config.reclaimer.cron, ReclaimCache::default)?;
    }
    Ok(())
}

/// The running pieces of a feedline instance.
pub struct App {
    config: AppConfig,
    assembler: FeedAssembler,
    post_service: PostCacheService,
    fanout: Arc<WorkerPool>,
    maintenance: Arc<WorkerPool>,
    scheduler: Arc<Scheduler>,
    db: Option<Arc<DatabasePool>>,
}

impl App {
    /// Connects to MySQL, the identity service and (optionally) Redis, and
    /// wires every component.
    pub async fn build(config: AppConfig) -> FeedResult<Self> {
        let db = create_db_pool(&config.database).await?;
        let stores = Stores::connect(&config, Arc::clone(&db))?;
        let backends = Backends::connect(&config).await?;

        let mut app = Self::assemble(config, backends, stores)?;
        app.db = Some(db);
        Ok(app)
    }

    /// Wires the services, consumers and scheduler on top of the given
    /// infrastructure.
    pub fn assemble(config: AppConfig, backends: Backends, stores: Stores) -> FeedResult<Self> {
        let caches = FeedCaches::new(backends.cache, backends.locker, &config.cache);
        let fanout_tasks = TaskPool::new("fanout", config.pools.fanout_concurrency);
        let maintenance_tasks = TaskPool::new("maintenance", config.pools.maintenance_concurrency);

        let post_service = PostCacheService::new(
            &caches,
            Arc::clone(&stores.posts),
            stores.comments,
            config.feed.comments_in_post,
        );
        let assembler = FeedAssembler::new(
            caches.clone(),
            Arc::clone(&stores.directory),
            Arc::clone(&stores.posts),
            post_service.clone(),
            fanout_tasks,
            config.feed.clone(),
        );
        let heater = CacheHeater::new(
            Arc::clone(&stores.directory),
            stores.posts,
            post_service.clone(),
            caches.users.clone(),
            assembler.clone(),
            Arc::clone(&backends.publisher),
            config.heater.clone(),
        );
        let reclaimer = CacheReclaimer::new(caches, maintenance_tasks, config.reclaimer.clone());
        let consumers = EventConsumers::new(
            assembler.clone(),
            post_service.clone(),
            heater,
            reclaimer,
            stores.directory,
            backends.dedup,
        );

        let fanout = Arc::new(WorkerPool::new(
            Arc::clone(&backends.bus),
            fanout_pool_config(&config),
        ));
        let maintenance = Arc::new(WorkerPool::new(backends.bus, maintenance_pool_config(&config)));
        consumers.register(&fanout, &maintenance);

        let scheduler = Arc::new(Scheduler::new(
            backends.coordination,
            backends.publisher,
            &config.events,
        ));
        schedule_maintenance(&scheduler, &config)?;

        Ok(Self {
            config,
            assembler,
            post_service,
            fanout,
            maintenance,
            scheduler,
            db: None,
        })
    }

    /// Feed reads and fan-out for callers embedding the instance.
    #[must_use]
    pub const fn assembler(&self) -> &FeedAssembler {
        &self.assembler
    }

    #[must_use]
    pub const fn post_service(&self) -> &PostCacheService {
        &self.post_service
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Runs the worker pools and the scheduler until `shutdown` resolves,
    /// then stops them and waits for in-flight events.
    pub async fn run<S>(self, shutdown: S) -> FeedResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        let mut tasks: Vec<(&'static str, JoinHandle<Result<(), String>>)> = Vec::new();

        for (name, pool) in [("fanout", &self.fanout), ("maintenance", &self.maintenance)] {
            let pool = Arc::clone(pool);
            tasks.push((
                name,
                tokio::spawn(async move { pool.start().await.map_err(|e| e.to_string()) }),
            ));
        }

        if self.config.events.scheduler.enabled {
            let scheduler = Arc::clone(&self.scheduler);
            tasks.push((
                "scheduler",
                tokio::spawn(async move { scheduler.start().await.map_err(|e| e.to_string()) }),
            ));
        } else {
            info!("Scheduler disabled");
        }

        info!(
            fanout_concurrency = self.config.pools.fanout_concurrency,
            maintenance_concurrency = self.config.pools.maintenance_concurrency,
            "Feedline running"
        );
        shutdown.await;

        self.scheduler.stop();
        self.fanout.stop();
        self.maintenance.stop();

        let grace = self.config.events.consumer.drain_timeout() + Duration::from_secs(1);
        for (name, task) in tasks {
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!(component = name, error = %e, "Component failed"),
                Ok(Err(e)) => error!(component = name, error = %e, "Component task aborted"),
                Err(_) => warn!(component = name, "Component did not stop in time"),
            }
        }

        if let Some(db) = &self.db {
            db.close().await;
        }

        info!("Feedline stopped");
        Ok(())
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("environment", &self.config.app.environment)
            .field("fanout", &self.fanout.id())
            .field("maintenance", &self.maintenance.id())
            .field("scheduler", &self.scheduler.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_without_redis_uses_memory_backends() {
        let mut config = AppConfig::default();
        config.redis.enabled = false;

        let backends = Backends::connect(&config).await.unwrap();
        assert!(matches!(backends.coordination, Coordination::Local));
        assert_eq!(backends.bus.queue_length("feed").await.unwrap(), 0);
    }

    #[test]
    fn test_enabled_maintenance_triggers_are_scheduled() {
        let mut config = AppConfig::default();
        config.heater.enabled = true;
        config.reclaimer.enabled = false;

        let backends = Backends::in_memory(&config);
        let scheduler = Scheduler::new(backends.coordination, backends.publisher, &config.events);
        schedule_maintenance(&scheduler, &config).unwrap();

        let names: Vec<String> = scheduler.list_triggers().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["cache-heat".to_string()]);
    }

    #[test]
    fn test_invalid_cron_fails_scheduling() {
        let mut config = AppConfig::default();
        config.reclaimer.enabled = true;
        config.reclaimer.cron = "whenever".to_string();

        let backends = Backends::in_memory(&config);
        let scheduler = Scheduler::new(backends.coordination, backends.publisher, &config.events);
        assert!(schedule_maintenance(&scheduler, &config).is_err());
    }
}

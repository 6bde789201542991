//! Worker pool consuming events from the bus.

use crate::bus::EventBus;
use crate::error::{EventError, EventResult};
use crate::event::{Event, EventContext, EventEnvelope};
use crate::metrics::names;
use feedline_config::ConsumerConfig;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Pool name, used in logs.
    pub name: String,

    /// Number of events handled concurrently.
    pub concurrency: usize,

    /// Queues to consume (in priority order).
    pub queues: Vec<String>,

    /// Handling timeout for one event.
    pub event_timeout: Duration,

    /// Polling interval while queues are empty.
    pub poll_interval: Duration,

    /// Shutdown timeout.
    pub shutdown_timeout: Duration,

    /// Age at which an unacknowledged delivery is taken as abandoned.
    pub stale_after: Duration,

    /// Interval between sweeps for abandoned deliveries.
    pub recover_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::for_queues("default", 4, vec!["default".to_string()], &ConsumerConfig::default())
    }
}

impl WorkerPoolConfig {
    /// Builds a pool configuration from the shared consumer settings.
    #[must_use]
    pub fn for_queues(
        name: impl Into<String>,
        concurrency: usize,
        queues: Vec<String>,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            concurrency: concurrency.max(1),
            queues,
            event_timeout: config.handler_timeout(),
            poll_interval: config.idle_poll(),
            shutdown_timeout: config.drain_timeout(),
            stale_after: config.stale_after(),
            recover_interval: config.recover_interval(),
        }
    }
}

/// Type-erased event handler.
type EventHandler =
    Arc<dyn Fn(EventEnvelope, EventContext) -> BoxFuture<'static, EventResult<()>> + Send + Sync>;

/// Shared state between the pool and its spawned handlers.
struct PoolInner {
    bus: Arc<dyn EventBus>,
    handlers: RwLock<HashMap<String, EventHandler>>,
    event_timeout: Duration,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl PoolInner {
    /// Runs one delivery to completion and acknowledges it on the bus.
    async fn handle(&self, envelope: EventEnvelope, worker_id: &str) {
        let ctx = envelope.to_context(worker_id);
        let handler = self.handlers.read().get(&envelope.name).cloned();

        debug!(
            event_id = %envelope.id,
            event = %envelope.name,
            attempt = envelope.attempt,
            worker_id = %worker_id,
            "Handling event"
        );

        let started = Instant::now();
        let outcome = match handler {
            Some(handler) => match timeout(self.event_timeout, handler(envelope.clone(), ctx)).await {
                Ok(result) => result,
                Err(_) => Err(EventError::Timeout(self.event_timeout.as_secs())),
            },
            None => {
                error!(event = %envelope.name, "No handler registered for event");
                Err(EventError::UnknownEvent(envelope.name.clone()))
            }
        };
        metrics::histogram!(names::EVENT_DURATION_SECONDS, "event" => envelope.name.clone())
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                if let Err(e) = self.bus.complete(&envelope).await {
                    error!(event_id = %envelope.id, error = %e, "Failed to acknowledge event");
                }
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(event_id = %envelope.id, event = %envelope.name, error = %err, "Event handling failed");
                if let Err(e) = self.bus.fail(&envelope, &err).await {
                    error!(event_id = %envelope.id, error = %e, "Failed to report event failure");
                }
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Pool of workers handling events concurrently.
pub struct WorkerPool {
    id: String,
    config: WorkerPoolConfig,
    inner: Arc<PoolInner>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(bus: Arc<dyn EventBus>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            id: format!("{}-{}", config.name, Uuid::new_v4()),
            inner: Arc::new(PoolInner {
                bus,
                handlers: RwLock::new(HashMap::new()),
                event_timeout: config.event_timeout,
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            config,
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Register the handler for an event type.
    ///
    /// Payloads that cannot be decoded fail with a serialization error,
    /// which is neither retried nor dead-lettered when the DLQ is disabled.
    pub fn register<E, F, Fut>(&self, handler: F)
    where
        E: Event,
        F: Fn(E, EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EventResult<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: EventHandler = Arc::new(
            move |envelope: EventEnvelope, ctx: EventContext| -> BoxFuture<'static, EventResult<()>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let event: E = envelope.decode()?;
                    handler(event, ctx).await
                })
            },
        );

        self.inner.handlers.write().insert(E::NAME.to_string(), erased);
        info!(pool = %self.config.name, event = E::NAME, "Registered event handler");
    }

    /// Run the pool until [`stop`](Self::stop) is called.
    pub async fn start(&self) -> EventResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EventError::Worker("Worker pool already running".to_string()));
        }

        info!(
            pool_id = %self.id,
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            "Starting worker pool"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let queues: Vec<&str> = self.config.queues.iter().map(String::as_str).collect();
        let mut last_recovery: Option<Instant> = None;

        loop {
            if last_recovery.map_or(true, |at| at.elapsed() >= self.config.recover_interval) {
                last_recovery = Some(Instant::now());
                if let Err(e) = self.recover_stale().await {
                    error!(pool_id = %self.id, error = %e, "Failed to recover abandoned deliveries");
                }
            }

            let permit = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(pool_id = %self.id, "Received shutdown signal");
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.inner.bus.dequeue(&queues, &self.id).await {
                Ok(Some(envelope)) => {
                    let inner = Arc::clone(&self.inner);
                    let worker_id = format!("{}-{}", self.id, Uuid::new_v4());
                    tokio::spawn(
                        async move {
                            inner.handle(envelope, &worker_id).await;
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("worker", pool = %self.config.name)),
                    );
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    error!(pool_id = %self.id, error = %e, "Failed to dequeue event");
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(pool_id = %self.id, "Received shutdown signal");
                    break;
                }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(pool_id = %self.id, "Waiting for in-flight events...");
        let concurrency = self.config.concurrency;
        let drained = timeout(self.config.shutdown_timeout, async {
            while semaphore.available_permits() < concurrency {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(pool_id = %self.id, "Shutdown timeout elapsed with events in flight");
        }

        self.running.store(false, Ordering::SeqCst);

        info!(
            pool_id = %self.id,
            processed = self.events_processed(),
            failed = self.events_failed(),
            "Worker pool stopped"
        );

        Ok(())
    }

    /// Handles queued events inline until the queues are empty.
    ///
    /// Returns the number of deliveries made. Events scheduled for a later
    /// retry are not waited for.
    pub async fn drain(&self) -> EventResult<usize> {
        let queues: Vec<&str> = self.config.queues.iter().map(String::as_str).collect();
        let mut delivered = 0;
        while let Some(envelope) = self.inner.bus.dequeue(&queues, &self.id).await? {
            self.inner.handle(envelope, &self.id).await;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Hands deliveries abandoned by dead consumers back to the bus.
    pub async fn recover_stale(&self) -> EventResult<u64> {
        let recovered = self.inner.bus.recover_stale(self.config.stale_after).await?;
        if recovered > 0 {
            warn!(pool_id = %self.id, count = recovered, "Recovered abandoned deliveries");
        }
        Ok(recovered)
    }

    /// Stop the worker pool.
    pub fn stop(&self) {
        info!(pool_id = %self.id, "Stopping worker pool...");
        let _ = self.shutdown_tx.send(());
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of events handled successfully.
    pub fn events_processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    /// Number of failed deliveries.
    pub fn events_failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            id: self.id.clone(),
            running: self.is_running(),
            concurrency: self.config.concurrency,
            events_processed: self.events_processed(),
            events_failed: self.events_failed(),
            queues: self.config.queues.clone(),
        }
    }
}

/// Worker pool statistics.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    /// Pool ID.
    pub id: String,

    /// Is running.
    pub running: bool,

    /// Configured concurrency.
    pub concurrency: usize,

    /// Events handled successfully.
    pub events_processed: u64,

    /// Failed deliveries.
    pub events_failed: u64,

    /// Queues being consumed.
    pub queues: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::PublisherExt;
    use crate::memory::MemoryEventBus;
    use crate::retry::Backoff;
    use feedline_core::FeedError;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    impl Event for Ping {
        const NAME: &'static str = "ping";
        const QUEUE: &'static str = "test";
        const MAX_RETRIES: u32 = 2;
    }

    fn config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            name: "test".to_string(),
            concurrency: 2,
            queues: vec!["test".to_string()],
            event_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(1),
            stale_after: Duration::from_secs(60),
            recover_interval: Duration::from_millis(20),
        }
    }

    fn pool(bus: Arc<MemoryEventBus>) -> WorkerPool {
        WorkerPool::new(bus, config())
    }

    fn bus() -> Arc<MemoryEventBus> {
        Arc::new(MemoryEventBus::default().with_backoff(Backoff::immediate()))
    }

    #[test]
    fn test_config_from_worker_settings() {
        let config = WorkerPoolConfig::for_queues(
            "feed",
            0,
            vec!["feed".to_string()],
            &ConsumerConfig::default(),
        );
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.event_timeout, Duration::from_secs(120));
        assert!(config.stale_after > config.event_timeout);
    }

    #[tokio::test]
    async fn test_drain_dispatches_to_handler() {
        let bus = bus();
        let pool = pool(Arc::clone(&bus));
        let total = Arc::new(AtomicU32::new(0));

        let seen = Arc::clone(&total);
        pool.register::<Ping, _, _>(move |ping, _ctx| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(ping.n, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(Ping { n: 2 }).await.unwrap();
        bus.publish(Ping { n: 3 }).await.unwrap();

        assert_eq!(pool.drain().await.unwrap(), 2);
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert_eq!(pool.events_processed(), 2);
    }

    #[tokio::test]
    async fn test_failing_handler_is_retried_with_same_id() {
        let bus = bus();
        let pool = pool(Arc::clone(&bus));
        let ids = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let seen = Arc::clone(&ids);
        pool.register::<Ping, _, _>(move |_ping, ctx| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(ctx.event_id.clone());
                if ctx.attempt < 2 {
                    Err(FeedError::store("flaky").into())
                } else {
                    Ok(())
                }
            }
        });

        bus.publish(Ping { n: 1 }).await.unwrap();

        assert_eq!(pool.drain().await.unwrap(), 2);
        let ids = ids.lock();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
        assert_eq!(pool.events_failed(), 1);
        assert_eq!(pool.events_processed(), 1);
    }

    #[tokio::test]
    async fn test_unknown_event_is_dead_lettered() {
        let bus = bus();
        let pool = pool(Arc::clone(&bus));

        bus.publish(Ping { n: 1 }).await.unwrap();
        pool.drain().await.unwrap();

        assert_eq!(bus.dead_letters(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_delivery_is_handled_again() {
        let bus = bus();
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            WorkerPoolConfig {
                stale_after: Duration::ZERO,
                ..config()
            },
        ));
        let attempts = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let seen = Arc::clone(&attempts);
        pool.register::<Ping, _, _>(move |_ping, ctx| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(ctx.attempt);
                Ok(())
            }
        });

        bus.publish(Ping { n: 1 }).await.unwrap();
        // a consumer that takes the event and dies before acknowledging it
        let lost = bus.dequeue(&["test"], "crashed").await.unwrap().unwrap();
        assert_eq!(pool.drain().await.unwrap(), 0);

        let runner = Arc::clone(&pool);
        let handle = tokio::spawn(async move { runner.start().await });

        for _ in 0..100 {
            if !attempts.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(*attempts.lock(), vec![lost.attempt + 1]);
        assert_eq!(bus.active_len(), 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let bus = bus();
        let pool = Arc::new(pool(Arc::clone(&bus)));
        let handled = Arc::new(AtomicU32::new(0));

        let seen = Arc::clone(&handled);
        pool.register::<Ping, _, _>(move |_ping, _ctx| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        bus.publish(Ping { n: 1 }).await.unwrap();

        let runner = Arc::clone(&pool);
        let handle = tokio::spawn(async move { runner.start().await });

        for _ in 0..100 {
            if handled.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert!(!pool.is_running());
    }
}

//! Cron scheduler publishing recurring trigger events.
//!
//! With Redis coordination only the elected leader publishes and last-run
//! times are shared between instances. Local coordination keeps both in
//! process and always leads.

use crate::bus::EventPublisher;
use crate::error::{EventError, EventResult};
use crate::event::{Event, EventEnvelope, EventId};
use crate::metrics::names;
use crate::redis::EventKeys;
use chrono::{DateTime, Utc};
use cron::Schedule;
use deadpool_redis::Pool;
use feedline_config::EventsConfig;
use feedline_config::SchedulerConfig;
use parking_lot::{Mutex, RwLock};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RELEASE_LOCK_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// How scheduler instances coordinate.
#[derive(Clone)]
pub enum Coordination {
    /// Leader election and last-run times in Redis.
    Redis(Arc<Pool>),
    /// Single instance; state kept in memory.
    Local,
}

type EnvelopeFactory = Arc<dyn Fn() -> EventResult<EventEnvelope> + Send + Sync>;

/// A recurring trigger.
#[derive(Clone)]
pub struct ScheduledTrigger {
    /// Unique trigger name.
    pub name: String,

    /// Cron expression (with seconds).
    pub cron: String,

    schedule: Schedule,

    factory: EnvelopeFactory,

    /// Is the trigger enabled.
    pub enabled: bool,
}

impl std::fmt::Debug for ScheduledTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTrigger")
            .field("name", &self.name)
            .field("cron", &self.cron)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ScheduledTrigger {
    /// Create a trigger publishing the event built by `factory`.
    pub fn new<E: Event>(
        name: impl Into<String>,
        cron_expr: &str,
        factory: impl Fn() -> E + Send + Sync + 'static,
    ) -> EventResult<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| EventError::Configuration(format!("Invalid cron expression: {e}")))?;

        Ok(Self {
            name: name.into(),
            cron: cron_expr.to_string(),
            schedule,
            factory: Arc::new(move || EventEnvelope::new(&factory())),
            enabled: true,
        })
    }

    /// Set whether the trigger is enabled.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// First fire time strictly after `from`.
    pub fn next_run_from(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    fn envelope(&self) -> EventResult<EventEnvelope> {
        (self.factory)()
    }
}

/// Information about a registered trigger.
#[derive(Debug, Clone)]
pub struct ScheduledTriggerInfo {
    /// Trigger name.
    pub name: String,

    /// Cron expression.
    pub cron: String,

    /// Is enabled.
    pub enabled: bool,

    /// Next fire time.
    pub next_run: Option<DateTime<Utc>>,
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Scheduler ID.
    pub id: String,

    /// Is this instance the leader.
    pub is_leader: bool,

    /// Number of registered triggers.
    pub triggers: usize,

    /// Triggers published by this instance.
    pub triggers_published: u64,

    /// Last time leadership was acquired.
    pub last_election: Option<DateTime<Utc>>,
}

/// Cron scheduler with optional distributed leader election.
pub struct Scheduler {
    id: String,
    coordination: Coordination,
    publisher: Arc<dyn EventPublisher>,
    config: SchedulerConfig,
    keys: EventKeys,
    triggers: RwLock<HashMap<String, ScheduledTrigger>>,
    local_runs: Mutex<HashMap<String, DateTime<Utc>>>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
    is_leader: AtomicBool,
    triggers_published: AtomicU64,
    last_election: Mutex<Option<DateTime<Utc>>>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(
        coordination: Coordination,
        publisher: Arc<dyn EventPublisher>,
        config: &EventsConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let local = matches!(coordination, Coordination::Local);

        Self {
            id: format!("scheduler-{}", Uuid::new_v4()),
            coordination,
            publisher,
            config: config.scheduler.clone(),
            keys: EventKeys::new(&config.key_prefix),
            triggers: RwLock::new(HashMap::new()),
            local_runs: Mutex::new(HashMap::new()),
            shutdown_tx,
            running: AtomicBool::new(false),
            is_leader: AtomicBool::new(local),
            triggers_published: AtomicU64::new(0),
            last_election: Mutex::new(None),
        }
    }

    /// Register a trigger.
    pub fn register(&self, trigger: ScheduledTrigger) {
        let name = trigger.name.clone();
        info!(trigger = %name, cron = %trigger.cron, "Registered scheduled trigger");
        self.triggers.write().insert(name, trigger);
    }

    /// Register an event type with a cron expression.
    pub fn schedule<E: Event>(
        &self,
        name: impl Into<String>,
        cron_expr: &str,
        factory: impl Fn() -> E + Send + Sync + 'static,
    ) -> EventResult<()> {
        self.register(ScheduledTrigger::new(name, cron_expr, factory)?);
        Ok(())
    }

    /// Check if this instance is the leader.
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Get scheduler ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    fn set_leader(&self, leader: bool) {
        let was = self.is_leader.swap(leader, Ordering::SeqCst);
        if leader && !was {
            *self.last_election.lock() = Some(Utc::now());
            info!(scheduler_id = %self.id, "Acquired scheduler leadership");
        }
        metrics::gauge!(names::SCHEDULER_IS_LEADER).set(if leader { 1.0 } else { 0.0 });
    }

    /// Try to acquire or keep leadership.
    async fn try_acquire_leadership(&self) -> EventResult<bool> {
        let Coordination::Redis(pool) = &self.coordination else {
            self.set_leader(true);
            return Ok(true);
        };

        let mut conn = pool.get().await?;
        let lock_key = self.keys.scheduler_lock();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg(&self.id)
            .arg("NX")
            .arg("EX")
            .arg(self.config.leader_lease_secs)
            .query_async(&mut *conn)
            .await?;

        if acquired.is_some() {
            self.set_leader(true);
            return Ok(true);
        }

        let current: Option<String> = conn.get(&lock_key).await?;
        if current.as_deref() == Some(self.id.as_str()) {
            let ttl = i64::try_from(self.config.leader_lease_secs).unwrap_or(i64::MAX);
            let _: () = conn.expire(&lock_key, ttl).await?;
            self.set_leader(true);
            return Ok(true);
        }

        self.set_leader(false);
        Ok(false)
    }

    async fn release_leadership(&self) -> EventResult<()> {
        let Coordination::Redis(pool) = &self.coordination else {
            return Ok(());
        };
        if !self.is_leader() {
            return Ok(());
        }

        let mut conn = pool.get().await?;
        let _: i32 = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(self.keys.scheduler_lock())
            .arg(&self.id)
            .invoke_async(&mut *conn)
            .await?;

        self.set_leader(false);
        info!(scheduler_id = %self.id, "Released scheduler leadership");
        Ok(())
    }

    async fn last_run(&self, trigger: &str) -> EventResult<Option<DateTime<Utc>>> {
        match &self.coordination {
            Coordination::Local => Ok(self.local_runs.lock().get(trigger).copied()),
            Coordination::Redis(pool) => {
                let mut conn = pool.get().await?;
                let stored: Option<String> = conn.get(self.keys.last_run(trigger)).await?;
                Ok(stored
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|t| t.with_timezone(&Utc)))
            }
        }
    }

    async fn set_last_run(&self, trigger: &str, at: DateTime<Utc>) -> EventResult<()> {
        match &self.coordination {
            Coordination::Local => {
                self.local_runs.lock().insert(trigger.to_string(), at);
            }
            Coordination::Redis(pool) => {
                let mut conn = pool.get().await?;
                let _: () = conn.set(self.keys.last_run(trigger), at.to_rfc3339()).await?;
            }
        }
        Ok(())
    }

    /// Publishes every trigger that fell due by `now`.
    ///
    /// A trigger seen for the first time is only stamped with `now`, so a
    /// fresh deployment does not fire everything at boot. Returns the number
    /// of triggers published.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> EventResult<usize> {
        if !self.is_leader() {
            return Ok(0);
        }

        let triggers: Vec<ScheduledTrigger> = self
            .triggers
            .read()
            .values()
            .filter(|t| t.enabled)
            .cloned()
            .collect();

        let mut published = 0;
        for trigger in triggers {
            let Some(last) = self.last_run(&trigger.name).await? else {
                self.set_last_run(&trigger.name, now).await?;
                debug!(trigger = %trigger.name, "Seeded trigger last run");
                continue;
            };

            let due = trigger.next_run_from(last).is_some_and(|next| next <= now);
            if !due {
                continue;
            }

            // stamp first so a concurrent tick does not publish twice
            self.set_last_run(&trigger.name, now).await?;
            match self.publish(&trigger).await {
                Ok(event_id) => {
                    published += 1;
                    debug!(trigger = %trigger.name, event_id = %event_id, "Published scheduled trigger");
                }
                Err(e) => {
                    error!(trigger = %trigger.name, error = %e, "Failed to publish scheduled trigger");
                    self.set_last_run(&trigger.name, last).await?;
                }
            }
        }
        Ok(published)
    }

    async fn publish(&self, trigger: &ScheduledTrigger) -> EventResult<EventId> {
        let id = self.publisher.publish_envelope(trigger.envelope()?).await?;
        self.triggers_published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(names::SCHEDULER_TRIGGERS_TOTAL, "trigger" => trigger.name.clone())
            .increment(1);
        Ok(id)
    }

    /// Publish a trigger immediately, regardless of its schedule.
    pub async fn trigger_now(&self, name: &str) -> EventResult<EventId> {
        let trigger = self
            .triggers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EventError::Scheduler(format!("Unknown trigger: {name}")))?;
        self.publish(&trigger).await
    }

    /// Run the scheduler until [`stop`](Self::stop) is called.
    pub async fn start(&self) -> EventResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EventError::Scheduler("Scheduler already running".to_string()));
        }

        info!(
            scheduler_id = %self.id,
            tick_secs = self.config.tick_secs,
            "Starting scheduler"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut poll = interval(self.config.tick());
        let mut leader_check =
            interval((self.config.leader_lease() / 3).max(Duration::from_secs(1)));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(scheduler_id = %self.id, "Received shutdown signal");
                    break;
                }
                _ = leader_check.tick() => {
                    if let Err(e) = self.try_acquire_leadership().await {
                        self.set_leader(false);
                        error!(error = %e, "Failed to check leadership");
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.tick_at(Utc::now()).await {
                        error!(error = %e, "Failed to check scheduled triggers");
                    }
                }
            }
        }

        if let Err(e) = self.release_leadership().await {
            warn!(error = %e, "Failed to release leadership on shutdown");
        }

        self.running.store(false, Ordering::SeqCst);
        info!(scheduler_id = %self.id, "Scheduler stopped");
        Ok(())
    }

    /// Stop the scheduler.
    pub fn stop(&self) {
        info!(scheduler_id = %self.id, "Stopping scheduler...");
        let _ = self.shutdown_tx.send(());
    }

    /// List all registered triggers.
    pub fn list_triggers(&self) -> Vec<ScheduledTriggerInfo> {
        let now = Utc::now();
        self.triggers
            .read()
            .values()
            .map(|t| ScheduledTriggerInfo {
                name: t.name.clone(),
                cron: t.cron.clone(),
                enabled: t.enabled,
                next_run: t.next_run_from(now),
            })
            .collect()
    }

    /// Get scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            id: self.id.clone(),
            is_leader: self.is_leader(),
            triggers: self.triggers.read().len(),
            triggers_published: self.triggers_published.load(Ordering::Relaxed),
            last_election: *self.last_election.lock(),
        }
    }
}

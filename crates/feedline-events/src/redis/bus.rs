//! Redis event bus implementation.

use super::EventKeys;
use crate::bus::{EventBus, EventPublisher, FailureDisposition};
use crate::error::{EventError, EventResult};
use crate::event::{EventEnvelope, EventId};
use crate::metrics::names;
use crate::retry::Backoff;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use deadpool_redis::Pool;
use feedline_config::EventsConfig;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pops the head of the first non-empty queue and parks it as active.
///
/// KEYS: active hash, active-since set, then the queues in priority order.
/// ARGV: current time in milliseconds. Undecodable members are returned
/// without being parked.
const DEQUEUE_SCRIPT: &str = r#"
    for i = 3, #KEYS do
        local popped = redis.call("zpopmin", KEYS[i], 1)
        if popped[1] then
            local ok, envelope = pcall(cjson.decode, popped[1])
            if ok and type(envelope) == "table" and type(envelope["id"]) == "string" then
                redis.call("hset", KEYS[1], envelope["id"], popped[1])
                redis.call("zadd", KEYS[2], ARGV[1], envelope["id"])
            end
            return popped[1]
        end
    end
    return false
"#;

/// Takes one parked delivery out of the active set.
///
/// Only the caller that removes the id from the active-since set gets the
/// envelope back.
const RECLAIM_SCRIPT: &str = r#"
    if redis.call("zrem", KEYS[2], ARGV[1]) == 0 then
        return false
    end
    local json = redis.call("hget", KEYS[1], ARGV[1])
    redis.call("hdel", KEYS[1], ARGV[1])
    return json
"#;

/// Redis-backed event bus.
pub struct RedisEventBus {
    pool: Arc<Pool>,
    keys: EventKeys,
    backoff: Backoff,
    dlq_enabled: bool,
    dlq_capacity: usize,
}

impl RedisEventBus {
    /// Create a new Redis event bus.
    #[must_use]
    pub fn new(pool: Arc<Pool>, config: &EventsConfig) -> Self {
        Self {
            pool,
            keys: EventKeys::new(&config.key_prefix),
            backoff: Backoff::from(&config.redelivery),
            dlq_enabled: config.dead_letter.enabled,
            dlq_capacity: config.dead_letter.capacity,
        }
    }

    async fn conn(&self) -> EventResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Higher priority = lower score (delivered first).
    fn priority_score(priority: i8, at_ms: i64) -> f64 {
        -f64::from(priority) * 1_000_000_000_000.0 + at_ms as f64
    }

    /// Drops the parked copy of a delivery once it is acknowledged.
    async fn unpark(
        &self,
        conn: &mut deadpool_redis::Connection,
        envelope: &EventEnvelope,
    ) -> EventResult<()> {
        let _: () = redis::pipe()
            .hdel(self.keys.active(), envelope.id.as_str())
            .zrem(self.keys.active_since(), envelope.id.as_str())
            .query_async(&mut **conn)
            .await?;
        Ok(())
    }

    /// Moves delayed events whose time has come to their queues.
    pub async fn promote_delayed(&self) -> EventResult<u64> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = conn.zrangebyscore(self.keys.delayed(), 0i64, now).await?;

        let mut moved = 0u64;
        for json in due {
            // only the instance that removes the member requeues it
            let removed: i64 = conn.zrem(self.keys.delayed(), &json).await?;
            if removed == 0 {
                continue;
            }

            match EventEnvelope::from_json(&json) {
                Ok(envelope) => {
                    let score = Self::priority_score(envelope.priority, now);
                    let _: () = conn.zadd(self.keys.queue(&envelope.queue), &json, score).await?;
                    moved += 1;
                }
                Err(e) => error!(error = %e, "Dropping undecodable delayed event"),
            }
        }

        if moved > 0 {
            debug!(count = moved, "Promoted delayed events");
        }
        Ok(moved)
    }
}

#[async_trait]
impl EventPublisher for RedisEventBus {
    async fn publish_envelope(&self, envelope: EventEnvelope) -> EventResult<EventId> {
        let json = envelope.to_json()?;
        let mut conn = self.conn().await?;

        let now = Utc::now().timestamp_millis();
        let due = envelope.scheduled_at.timestamp_millis();

        if due > now {
            let _: () = conn.zadd(self.keys.delayed(), &json, due as f64).await?;
        } else {
            let score = Self::priority_score(envelope.priority, now);
            let _: () = conn.zadd(self.keys.queue(&envelope.queue), &json, score).await?;
        }

        metrics::counter!(names::EVENTS_PUBLISHED_TOTAL, "event" => envelope.name.clone())
            .increment(1);
        debug!(
            event_id = %envelope.id,
            event = %envelope.name,
            queue = %envelope.queue,
            "Published event"
        );

        Ok(envelope.id)
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn dequeue(
        &self,
        queues: &[&str],
        worker_id: &str,
    ) -> EventResult<Option<EventEnvelope>> {
        if let Err(e) = self.promote_delayed().await {
            warn!(error = %e, "Failed to promote delayed events");
        }

        if queues.is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn().await?;
        let script = redis::Script::new(DEQUEUE_SCRIPT);

        loop {
            let mut invocation = script.prepare_invoke();
            invocation
                .key(self.keys.active())
                .key(self.keys.active_since())
                .arg(Utc::now().timestamp_millis());
            for queue in queues {
                invocation.key(self.keys.queue(queue));
            }

            let popped: Option<String> = invocation.invoke_async(&mut *conn).await?;
            let Some(json) = popped else {
                return Ok(None);
            };

            match EventEnvelope::from_json(&json) {
                Ok(mut envelope) => {
                    // the parked copy keeps the previous attempt count
                    envelope.attempt += 1;
                    debug!(
                        event_id = %envelope.id,
                        event = %envelope.name,
                        attempt = envelope.attempt,
                        worker_id = %worker_id,
                        "Dequeued event"
                    );
                    return Ok(Some(envelope));
                }
                Err(e) => error!(error = %e, "Dropping undecodable event"),
            }
        }
    }

    async fn complete(&self, envelope: &EventEnvelope) -> EventResult<()> {
        let mut conn = self.conn().await?;
        self.unpark(&mut conn, envelope).await?;

        metrics::counter!(names::EVENTS_COMPLETED_TOTAL, "event" => envelope.name.clone())
            .increment(1);
        debug!(event_id = %envelope.id, "Completed event");
        Ok(())
    }

    async fn fail(&self, envelope: &EventEnvelope, error: &EventError) -> EventResult<()> {
        let mut conn = self.conn().await?;
        self.unpark(&mut conn, envelope).await?;
        metrics::counter!(names::EVENTS_FAILED_TOTAL, "event" => envelope.name.clone())
            .increment(1);

        let mut failed = envelope.clone();
        failed.last_error = Some(error.to_string());

        match FailureDisposition::decide(envelope, error, self.dlq_enabled) {
            FailureDisposition::Retry => {
                let delay = self.backoff.delay(envelope.attempt);
                failed.scheduled_at =
                    Utc::now() + ChronoDuration::from_std(delay).unwrap_or_default();

                let due = failed.scheduled_at.timestamp_millis() as f64;
                let _: () = conn.zadd(self.keys.delayed(), failed.to_json()?, due).await?;

                metrics::counter!(names::EVENTS_RETRIED_TOTAL).increment(1);
                debug!(
                    event_id = %envelope.id,
                    attempt = envelope.attempt,
                    retry_at = %failed.scheduled_at,
                    "Scheduled event redelivery"
                );
            }
            FailureDisposition::DeadLetter => {
                let now = Utc::now().timestamp_millis() as f64;
                let keep = isize::try_from(self.dlq_capacity).unwrap_or(isize::MAX);

                let _: () = redis::pipe()
                    .zadd(self.keys.dlq(), failed.to_json()?, now)
                    .zremrangebyrank(self.keys.dlq(), 0, -keep.saturating_add(1))
                    .query_async(&mut *conn)
                    .await?;

                metrics::counter!(names::EVENTS_DEAD_LETTERED_TOTAL).increment(1);
                warn!(
                    event_id = %envelope.id,
                    event = %envelope.name,
                    attempts = envelope.attempt,
                    error = %error,
                    "Moved event to dead letter queue"
                );
            }
            FailureDisposition::Discard => {
                warn!(
                    event_id = %envelope.id,
                    event = %envelope.name,
                    error = %error,
                    "Discarded failed event"
                );
            }
        }

        Ok(())
    }

    async fn queue_length(&self, queue: &str) -> EventResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(self.keys.queue(queue)).await?)
    }

    async fn dead_letters(&self, limit: usize) -> EventResult<Vec<EventEnvelope>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);

        let entries: Vec<String> = conn.zrevrange(self.keys.dlq(), 0, stop).await?;
        Ok(entries
            .iter()
            .filter_map(|json| EventEnvelope::from_json(json).ok())
            .collect())
    }

    async fn recover_stale(&self, older_than: Duration) -> EventResult<u64> {
        let mut conn = self.conn().await?;
        let window = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(window);

        let stale: Vec<String> = conn.zrangebyscore(self.keys.active_since(), 0i64, cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let error = EventError::Worker(format!(
            "delivery unacknowledged for over {}s",
            older_than.as_secs()
        ));
        let reclaim = redis::Script::new(RECLAIM_SCRIPT);
        let mut recovered = 0u64;

        for id in stale {
            let parked: Option<String> = reclaim
                .key(self.keys.active())
                .key(self.keys.active_since())
                .arg(&id)
                .invoke_async(&mut *conn)
                .await?;
            let Some(json) = parked else {
                continue;
            };

            match EventEnvelope::from_json(&json) {
                Ok(mut envelope) => {
                    envelope.attempt += 1;
                    warn!(
                        event_id = %envelope.id,
                        event = %envelope.name,
                        attempt = envelope.attempt,
                        "Recovering abandoned delivery"
                    );
                    self.fail(&envelope, &error).await?;
                    recovered += 1;
                }
                Err(e) => error!(event_id = %id, error = %e, "Dropping undecodable active event"),
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered abandoned deliveries");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_score_orders_high_priority_first() {
        let now = 1_700_000_000_000;
        let high = RedisEventBus::priority_score(10, now + 5_000);
        let normal = RedisEventBus::priority_score(0, now);
        assert!(high < normal);
    }

    #[test]
    fn test_priority_score_is_fifo_within_priority() {
        let earlier = RedisEventBus::priority_score(0, 1_000);
        let later = RedisEventBus::priority_score(0, 2_000);
        assert!(earlier < later);
    }
}

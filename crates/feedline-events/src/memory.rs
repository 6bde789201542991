//! In-process event bus.
//!
//! Used when Redis is disabled and by tests. Delivery, retry and dead-letter
//! semantics match [`RedisEventBus`](crate::RedisEventBus) within a single
//! process.

use crate::bus::{EventBus, EventPublisher, FailureDisposition};
use crate::error::{EventError, EventResult};
use crate::event::{Event, EventEnvelope, EventId};
use crate::metrics::names;
use crate::retry::Backoff;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use feedline_config::EventsConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct BusState {
    queues: HashMap<String, VecDeque<EventEnvelope>>,
    delayed: Vec<EventEnvelope>,
    dead_letters: VecDeque<EventEnvelope>,
    /// Unacknowledged deliveries and when they were handed out.
    active: HashMap<EventId, (EventEnvelope, Instant)>,
}

impl BusState {
    fn enqueue(&mut self, envelope: EventEnvelope) {
        self.queues
            .entry(envelope.queue.clone())
            .or_default()
            .push_back(envelope);
    }

    fn promote_delayed(&mut self) {
        let now = Utc::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|envelope| envelope.scheduled_at <= now);
        self.delayed = waiting;
        for envelope in due {
            self.enqueue(envelope);
        }
    }

    /// Pops the highest-priority event, oldest first within a priority.
    fn pop(&mut self, queue: &str) -> Option<EventEnvelope> {
        let pending = self.queues.get_mut(queue)?;
        let top = pending.iter().map(|e| e.priority).max()?;
        let index = pending.iter().position(|e| e.priority == top)?;
        pending.remove(index)
    }
}

/// Event bus kept in process memory.
#[derive(Debug)]
pub struct MemoryEventBus {
    state: Mutex<BusState>,
    backoff: Backoff,
    dlq_enabled: bool,
    dlq_capacity: usize,
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(&EventsConfig::default())
    }
}

impl MemoryEventBus {
    /// Create a new in-memory bus.
    #[must_use]
    pub fn new(config: &EventsConfig) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            backoff: Backoff::from(&config.redelivery),
            dlq_enabled: config.dead_letter.enabled,
            dlq_capacity: config.dead_letter.capacity,
        }
    }

    /// Overrides the redelivery backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Envelopes waiting in a queue, in publication order.
    #[must_use]
    pub fn pending(&self, queue: &str) -> Vec<EventEnvelope> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|pending| pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Decoded events of one type waiting in their queue.
    #[must_use]
    pub fn pending_events<E: Event>(&self) -> Vec<E> {
        self.pending(E::QUEUE)
            .iter()
            .filter(|envelope| envelope.name == E::NAME)
            .filter_map(|envelope| envelope.decode().ok())
            .collect()
    }

    /// Number of events waiting for a retry.
    #[must_use]
    pub fn delayed_len(&self) -> usize {
        self.state.lock().delayed.len()
    }

    /// Number of deliveries not yet acknowledged.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish_envelope(&self, envelope: EventEnvelope) -> EventResult<EventId> {
        let id = envelope.id.clone();
        metrics::counter!(names::EVENTS_PUBLISHED_TOTAL, "event" => envelope.name.clone())
            .increment(1);
        debug!(event_id = %id, event = %envelope.name, "Published event");

        let mut state = self.state.lock();
        if envelope.scheduled_at > Utc::now() {
            state.delayed.push(envelope);
        } else {
            state.enqueue(envelope);
        }
        Ok(id)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn dequeue(
        &self,
        queues: &[&str],
        _worker_id: &str,
    ) -> EventResult<Option<EventEnvelope>> {
        let mut state = self.state.lock();
        state.promote_delayed();

        for queue in queues {
            if let Some(mut envelope) = state.pop(queue) {
                envelope.attempt += 1;
                state
                    .active
                    .insert(envelope.id.clone(), (envelope.clone(), Instant::now()));
                return Ok(Some(envelope));
            }
        }
        Ok(None)
    }

    async fn complete(&self, envelope: &EventEnvelope) -> EventResult<()> {
        self.state.lock().active.remove(&envelope.id);
        metrics::counter!(names::EVENTS_COMPLETED_TOTAL, "event" => envelope.name.clone())
            .increment(1);
        Ok(())
    }

    async fn fail(&self, envelope: &EventEnvelope, error: &EventError) -> EventResult<()> {
        self.state.lock().active.remove(&envelope.id);
        metrics::counter!(names::EVENTS_FAILED_TOTAL, "event" => envelope.name.clone())
            .increment(1);

        let mut failed = envelope.clone();
        failed.last_error = Some(error.to_string());

        match FailureDisposition::decide(envelope, error, self.dlq_enabled) {
            FailureDisposition::Retry => {
                let delay = self.backoff.delay(envelope.attempt);
                failed.scheduled_at =
                    Utc::now() + ChronoDuration::from_std(delay).unwrap_or_default();
                metrics::counter!(names::EVENTS_RETRIED_TOTAL).increment(1);
                self.state.lock().delayed.push(failed);
            }
            FailureDisposition::DeadLetter => {
                metrics::counter!(names::EVENTS_DEAD_LETTERED_TOTAL).increment(1);
                warn!(event_id = %envelope.id, error = %error, "Moved event to dead letter queue");

                let mut state = self.state.lock();
                state.dead_letters.push_front(failed);
                state.dead_letters.truncate(self.dlq_capacity);
            }
            FailureDisposition::Discard => {
                warn!(event_id = %envelope.id, error = %error, "Discarded failed event");
            }
        }
        Ok(())
    }

    async fn queue_length(&self, queue: &str) -> EventResult<u64> {
        let state = self.state.lock();
        let len = state.queues.get(queue).map_or(0, VecDeque::len);
        Ok(len as u64)
    }

    async fn dead_letters(&self, limit: usize) -> EventResult<Vec<EventEnvelope>> {
        Ok(self
            .state
            .lock()
            .dead_letters
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recover_stale(&self, older_than: Duration) -> EventResult<u64> {
        let stale: Vec<EventEnvelope> = {
            let mut state = self.state.lock();
            let ids: Vec<EventId> = state
                .active
                .iter()
                .filter(|(_, (_, since))| since.elapsed() >= older_than)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| state.active.remove(id))
                .map(|(envelope, _)| envelope)
                .collect()
        };

        let error = EventError::Worker(format!(
            "delivery unacknowledged for over {}s",
            older_than.as_secs()
        ));
        let mut recovered = 0u64;
        for envelope in stale {
            warn!(event_id = %envelope.id, event = %envelope.name, "Recovering abandoned delivery");
            self.fail(&envelope, &error).await?;
            recovered += 1;
        }
        Ok(recovered)
    }
}

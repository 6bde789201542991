//! Event bus abstraction.

use crate::error::{EventError, EventResult};
use crate::event::{Event, EventEnvelope, EventId, OutgoingEvent};
use async_trait::async_trait;
use std::time::Duration;

/// Publishing side of the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a prepared envelope.
    async fn publish_envelope(&self, envelope: EventEnvelope) -> EventResult<EventId>;
}

/// Typed publishing helpers.
#[async_trait]
pub trait PublisherExt: EventPublisher {
    /// Publish an event.
    async fn publish<E: Event>(&self, event: E) -> EventResult<EventId> {
        self.publish_envelope(EventEnvelope::new(&event)?).await
    }

    /// Publish an event with options.
    async fn publish_with<E: Event>(&self, outgoing: OutgoingEvent<E>) -> EventResult<EventId> {
        self.publish_envelope(outgoing.build()?).await
    }
}

impl<P: EventPublisher + ?Sized> PublisherExt for P {}

/// Consuming side of the bus: at-least-once delivery with acknowledgement.
#[async_trait]
pub trait EventBus: EventPublisher {
    /// Take the next deliverable event from the first non-empty queue.
    ///
    /// The returned envelope has its attempt counter already incremented.
    async fn dequeue(&self, queues: &[&str], worker_id: &str)
        -> EventResult<Option<EventEnvelope>>;

    /// Acknowledge a successfully handled event.
    async fn complete(&self, envelope: &EventEnvelope) -> EventResult<()>;

    /// Report a failed delivery; the bus retries or dead-letters it.
    async fn fail(&self, envelope: &EventEnvelope, error: &EventError) -> EventResult<()>;

    /// Number of events waiting in a queue.
    async fn queue_length(&self, queue: &str) -> EventResult<u64>;

    /// Most recent dead-lettered events.
    async fn dead_letters(&self, limit: usize) -> EventResult<Vec<EventEnvelope>>;

    /// Fails deliveries left unacknowledged for longer than `older_than`.
    ///
    /// A consumer that dies mid-handler never acknowledges its delivery. The
    /// lost delivery counts as an attempt and the event is retried or
    /// dead-lettered like any other failure. Returns the number recovered.
    async fn recover_stale(&self, older_than: Duration) -> EventResult<u64>;
}

/// Outcome of a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Deliver again later.
    Retry,
    /// Park in the dead letter queue.
    DeadLetter,
    /// Drop the event.
    Discard,
}

impl FailureDisposition {
    /// Decides what happens to an envelope whose latest delivery failed.
    #[must_use]
    pub fn decide(envelope: &EventEnvelope, error: &EventError, dlq_enabled: bool) -> Self {
        if error.is_retryable() && !envelope.is_exhausted() {
            Self::Retry
        } else if dlq_enabled && error.should_dlq() {
            Self::DeadLetter
        } else {
            Self::Discard
        }
    }
}

//! Event trait and envelope.

use crate::error::EventResult;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique event identifier.
///
/// Retries of one event keep its id, which makes the id usable as an
/// idempotency key by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Creates a new time-ordered event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the event ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Event priority levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum Priority {
    /// Background maintenance.
    Low = -10,
    /// Default.
    #[default]
    Normal = 0,
    /// Delivered ahead of normal events.
    High = 10,
}

impl From<i8> for Priority {
    fn from(value: i8) -> Self {
        match value {
            v if v >= 10 => Self::High,
            v if v <= -10 => Self::Low,
            _ => Self::Normal,
        }
    }
}

impl From<Priority> for i8 {
    fn from(priority: Priority) -> Self {
        priority as i8
    }
}

/// A message carried by the event bus.
///
/// ```rust,ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// struct LikeAdded { post_id: PostId, user_id: UserId }
///
/// impl Event for LikeAdded {
///     const NAME: &'static str = "like-added";
///     const QUEUE: &'static str = "post-activity";
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name for this event type.
    const NAME: &'static str;

    /// Queue the event is published to.
    const QUEUE: &'static str;

    /// Maximum number of redeliveries after a failure.
    const MAX_RETRIES: u32 = 3;
}

/// Serialized event stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event ID.
    pub id: EventId,

    /// Event type name.
    pub name: String,

    /// Queue name.
    pub queue: String,

    /// Serialized event payload.
    pub payload: String,

    /// Number of deliveries so far.
    pub attempt: u32,

    /// Maximum deliveries.
    pub max_attempts: u32,

    /// When the event was published.
    pub created_at: DateTime<Utc>,

    /// When the event becomes deliverable.
    pub scheduled_at: DateTime<Utc>,

    /// Priority (higher = more urgent).
    pub priority: i8,

    /// Correlation ID for tracing.
    pub correlation_id: Option<String>,

    /// Error from last failed attempt.
    pub last_error: Option<String>,
}

impl EventEnvelope {
    /// Wraps an event.
    pub fn new<E: Event>(event: &E) -> EventResult<Self> {
        let now = Utc::now();

        Ok(Self {
            id: EventId::new(),
            name: E::NAME.to_string(),
            queue: E::QUEUE.to_string(),
            payload: serde_json::to_string(event)?,
            attempt: 0,
            max_attempts: E::MAX_RETRIES + 1,
            created_at: now,
            scheduled_at: now,
            priority: Priority::Normal.into(),
            correlation_id: None,
            last_error: None,
        })
    }

    /// Deserialize the event payload.
    pub fn decode<E: Event>(&self) -> EventResult<E> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Check if max attempts reached.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Create the handling context for a delivery.
    #[must_use]
    pub fn to_context(&self, worker_id: &str) -> EventContext {
        EventContext {
            event_id: self.id.clone(),
            attempt: self.attempt,
            max_attempts: self.max_attempts,
            queue: self.queue.clone(),
            correlation_id: self.correlation_id.clone(),
            worker_id: worker_id.to_string(),
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> EventResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> EventResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Delivery context handed to handlers.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Event ID, stable across retries.
    pub event_id: EventId,

    /// Current delivery number (1-based).
    pub attempt: u32,

    /// Maximum deliveries allowed.
    pub max_attempts: u32,

    /// Queue name.
    pub queue: String,

    /// Correlation ID for tracing.
    pub correlation_id: Option<String>,

    /// Worker handling the delivery.
    pub worker_id: String,
}

impl EventContext {
    /// Returns true if this is the last delivery.
    #[must_use]
    pub const fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Builder for publishing an event with options.
pub struct OutgoingEvent<E: Event> {
    event: E,
    priority: Priority,
    correlation_id: Option<String>,
}

impl<E: Event> OutgoingEvent<E> {
    /// Create a new outgoing event builder.
    pub fn new(event: E) -> Self {
        Self {
            event,
            priority: Priority::Normal,
            correlation_id: None,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set correlation ID for tracing.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Build the envelope.
    pub fn build(self) -> EventResult<EventEnvelope> {
        let mut envelope = EventEnvelope::new(&self.event)?;
        envelope.priority = self.priority.into();
        envelope.correlation_id = self.correlation_id;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    impl Event for Ping {
        const NAME: &'static str = "ping";
        const QUEUE: &'static str = "test";
    }

    #[test]
    fn test_event_id_generation() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn test_envelope_wraps_event() {
        let envelope = EventEnvelope::new(&Ping { n: 7 }).unwrap();

        assert_eq!(envelope.name, "ping");
        assert_eq!(envelope.queue, "test");
        assert_eq!(envelope.max_attempts, 4);
        assert_eq!(envelope.decode::<Ping>().unwrap(), Ping { n: 7 });

        let restored = EventEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(restored, envelope);
    }

    #[test]
    fn test_context() {
        let mut envelope = EventEnvelope::new(&Ping { n: 1 }).unwrap();
        envelope.attempt = 4;

        let ctx = envelope.to_context("worker-1");
        assert_eq!(ctx.event_id, envelope.id);
        assert!(ctx.is_last_attempt());
        assert!(envelope.is_exhausted());
    }

    #[test]
    fn test_outgoing_event_options() {
        let envelope = OutgoingEvent::new(Ping { n: 1 })
            .priority(Priority::High)
            .correlation_id("req-1")
            .build()
            .unwrap();

        assert_eq!(Priority::from(envelope.priority), Priority::High);
        assert_eq!(envelope.correlation_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::from(-15), Priority::Low);
    }
}

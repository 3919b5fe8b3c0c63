//! Queue lifecycle events.
//!
//! Every queue publishes on a broadcast channel. Subscribers that fall
//! behind lose the oldest events; the queue never blocks on them.

use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::request::Priority;

/// Broadcast buffer per queue.
pub(crate) const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct QueueEvent {
    /// Request the event belongs to.
    pub id: Uuid,
    pub queue: &'static str,
    pub kind: QueueEventKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl QueueEvent {
    pub fn new(queue: &'static str, id: Uuid, kind: QueueEventKind) -> Self {
        Self {
            id,
            queue,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEventKind {
    Enqueued { priority: Priority },
    Started { attempt: u32 },
    Succeeded { elapsed_ms: u64 },
    /// A transient failure put the request back at the front of its band.
    RetryScheduled { retry: u32, backoff_ms: u64, error: String },
    RetriesExhausted { retries: u32, error: String },
    PermanentFailure { error: String },
}

impl QueueEventKind {
    pub(crate) fn retry_scheduled(retry: u32, backoff: Duration, error: String) -> Self {
        Self::RetryScheduled {
            retry,
            backoff_ms: duration_ms(backoff),
            error,
        }
    }

    /// Label used on the `courier_queue_events_total` counter.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Started { .. } => "started",
            Self::Succeeded { .. } => "succeeded",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::PermanentFailure { .. } => "permanent_failure",
        }
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn channel() -> broadcast::Sender<QueueEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_tagged_kind() {
        let event = QueueEvent::new(
            "webhook",
            Uuid::nil(),
            QueueEventKind::retry_scheduled(1, Duration::from_millis(200), "503".into()),
        );
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["queue"], "webhook");
        assert_eq!(json["kind"]["type"], "retry_scheduled");
        assert_eq!(json["kind"]["backoff_ms"], 200);
    }
}

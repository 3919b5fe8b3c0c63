use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::QueueError;

/// Scheduling band for a queued request. High drains before Medium,
/// Medium before Low.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub(crate) fn band(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) type Responder<O> = oneshot::Sender<Result<O, QueueError>>;

/// A unit of work waiting in, or moving through, a queue.
pub(crate) struct QueuedRequest<P, O> {
    pub id: Uuid,
    pub payload: P,
    pub priority: Priority,
    pub retries: u32,
    /// Copied from the queue config when the request is created.
    pub max_retries: u32,
    pub enqueued_at: Instant,
    pub responder: Option<Responder<O>>,
}

impl<P, O> QueuedRequest<P, O> {
    pub fn new(
        payload: P,
        priority: Priority,
        max_retries: u32,
        responder: Option<Responder<O>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            priority,
            retries: 0,
            max_retries,
            enqueued_at: Instant::now(),
            responder,
        }
    }

    /// Deliver the final outcome to whoever awaits it, if anyone.
    pub fn respond(&mut self, outcome: Result<O, QueueError>) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(outcome);
        }
    }
}

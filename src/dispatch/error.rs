use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Failure of a single external call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Worth retrying: 5xx, rate limiting, connection trouble.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Retrying cannot help: malformed payload, rejected request.
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl DispatchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Timeouts count as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Final outcome of a queued request that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("request {id} failed permanently: {source}")]
    Permanent {
        id: Uuid,
        #[source]
        source: DispatchError,
    },
    #[error("request {id} dropped after {retries} retries: {source}")]
    RetriesExhausted {
        id: Uuid,
        retries: u32,
        #[source]
        source: DispatchError,
    },
    #[error("queue `{queue}` closed before the request completed")]
    Closed { queue: &'static str },
}

impl QueueError {
    /// The last call failure, when there was one.
    pub fn dispatch_error(&self) -> Option<&DispatchError> {
        match self {
            Self::Permanent { source, .. } | Self::RetriesExhausted { source, .. } => Some(source),
            Self::Closed { .. } => None,
        }
    }
}

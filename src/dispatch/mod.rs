//! Bounded request queues.
//!
//! One [`RequestQueue`] exists per external collaborator. The collaborator
//! only supplies a [`Dispatcher`]; the queue owns ordering, concurrency,
//! per-call timeouts and retry with exponential backoff.
//!
//! Ordering is by [`Priority`] band, FIFO within a band. A request that fails
//! transiently sleeps `backoff_base * 2^retries` and then re-enters at the
//! front of its band. Permanent failures and exhausted retries are dropped
//! and reported through [`QueueEvent`]s.

mod config;
mod error;
mod events;
mod queue;
mod request;

use async_trait::async_trait;

pub use config::QueueConfig;
pub use error::{DispatchError, QueueError};
pub use events::{QueueEvent, QueueEventKind};
pub use queue::{Completion, QueueStats, RequestQueue};
pub use request::Priority;

/// Executes one external call for a queued payload.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;
    type Output: Send + 'static;

    async fn dispatch(&self, payload: &Self::Payload) -> Result<Self::Output, DispatchError>;
}

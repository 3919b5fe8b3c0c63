use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::dispatch::{Dispatcher, Priority, QueueError, RequestQueue};

use super::config::BatcherConfig;
use super::operation::{BatchedOperation, SheetCall, plan_calls};

/// Outcome shared by every operation of a failed flush.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("batch for `{destination}` failed: {source}")]
    Failed {
        destination: String,
        #[source]
        source: QueueError,
    },
    #[error("batch was dropped before it executed")]
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    Size,
    Deadline,
    Manual,
}

impl FlushReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Deadline => "deadline",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatcherStats {
    /// Operations waiting in an open group.
    pub pending: usize,
    pub open_groups: usize,
    pub flushes: u64,
}

/// Resolves once the operation's group has executed.
#[derive(Debug)]
pub struct BatchTicket {
    id: Uuid,
    receiver: oneshot::Receiver<Result<(), BatchError>>,
}

impl BatchTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for BatchTicket {
    type Output = Result<(), BatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BatchError::Dropped)))
    }
}

struct Group {
    epoch: u64,
    opened_at: Instant,
    operations: Vec<BatchedOperation>,
    waiters: Vec<oneshot::Sender<Result<(), BatchError>>>,
}

impl Group {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            opened_at: Instant::now(),
            operations: Vec::new(),
            waiters: Vec::new(),
        }
    }
}

struct Inner<D>
where
    D: Dispatcher<Payload = SheetCall, Output = ()>,
{
    config: BatcherConfig,
    queue: Arc<RequestQueue<D>>,
    groups: DashMap<String, Group>,
    epochs: AtomicU64,
    flushes: AtomicU64,
}

/// Coalesces spreadsheet operations per destination and forwards flushed
/// groups to the spreadsheet queue.
pub struct RequestBatcher<D>
where
    D: Dispatcher<Payload = SheetCall, Output = ()>,
{
    inner: Arc<Inner<D>>,
}

impl<D> RequestBatcher<D>
where
    D: Dispatcher<Payload = SheetCall, Output = ()>,
{
    pub fn new(config: BatcherConfig, queue: Arc<RequestQueue<D>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                queue,
                groups: DashMap::new(),
                epochs: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Add an operation to its destination's group.
    ///
    /// The first operation of a group arms the group's deadline; reaching
    /// `batch_size` flushes right away.
    pub fn queue_operation(&self, operation: BatchedOperation) -> BatchTicket {
        let (sender, receiver) = oneshot::channel();
        let id = operation.id;
        let key = operation.destination_key.clone();

        let mut opened = None;
        let mut full = None;
        {
            let mut group = self.inner.groups.entry(key.clone()).or_insert_with(|| {
                let epoch = self.inner.epochs.fetch_add(1, Ordering::Relaxed);
                opened = Some(epoch);
                Group::new(epoch)
            });
            group.operations.push(operation);
            group.waiters.push(sender);
            if group.operations.len() >= self.inner.config.batch_size.get() {
                full = Some(group.epoch);
            }
        }

        debug!(destination = %key, operation_id = %id, "Operation batched");

        match (full, opened) {
            (Some(epoch), _) => self.inner.flush_group(&key, epoch, FlushReason::Size),
            (None, Some(epoch)) => self.arm_deadline(key, epoch),
            (None, None) => {}
        }

        BatchTicket { id, receiver }
    }

    /// Flush every open group now. Returns the number of groups flushed.
    pub fn flush_all(&self) -> usize {
        let keys: Vec<String> = self
            .inner
            .groups
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut flushed = 0;
        for key in keys {
            if let Some((key, group)) = self.inner.groups.remove(&key) {
                self.inner.dispatch(key, group, FlushReason::Manual);
                flushed += 1;
            }
        }
        flushed
    }

    /// Operations queued but not yet flushed.
    pub fn pending(&self) -> usize {
        self.inner
            .groups
            .iter()
            .map(|entry| entry.operations.len())
            .sum()
    }

    pub fn stats(&self) -> BatcherStats {
        BatcherStats {
            pending: self.pending(),
            open_groups: self.inner.groups.len(),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
        }
    }

    fn arm_deadline(&self, key: String, epoch: u64) {
        let inner: Weak<Inner<D>> = Arc::downgrade(&self.inner);
        let max_wait = self.inner.config.max_wait;
        tokio::spawn(async move {
            sleep(max_wait).await;
            if let Some(inner) = inner.upgrade() {
                inner.flush_group(&key, epoch, FlushReason::Deadline);
            }
        });
    }
}

impl<D> Inner<D>
where
    D: Dispatcher<Payload = SheetCall, Output = ()>,
{
    /// Flush the group only if it is still the one opened at `epoch`; a group
    /// flushed by size and reopened must not be cut short by the old deadline.
    fn flush_group(&self, key: &str, epoch: u64, reason: FlushReason) {
        if let Some((key, group)) = self.groups.remove_if(key, |_, group| group.epoch == epoch) {
            self.dispatch(key, group, reason);
        }
    }

    fn dispatch(&self, destination: String, group: Group, reason: FlushReason) {
        let operations = group.operations.len();
        let calls = plan_calls(&destination, group.operations);
        self.flushes.fetch_add(1, Ordering::Relaxed);

        info!(
            destination = %destination,
            operations,
            calls = calls.len(),
            reason = reason.as_str(),
            waited_ms = u64::try_from(group.opened_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Flushing batch"
        );
        counter!("courier_batch_flush_total", "reason" => reason.as_str()).increment(1);
        histogram!("courier_batch_operations").record(operations as f64);

        let completions: Vec<_> = calls
            .into_iter()
            .map(|call| self.queue.submit(call, Priority::Medium))
            .collect();
        let waiters = group.waiters;

        tokio::spawn(async move {
            let failure = join_all(completions)
                .await
                .into_iter()
                .find_map(Result::err);
            let outcome = match failure {
                None => Ok(()),
                Some(source) => {
                    error!(destination = %destination, error = %source, "Batch failed");
                    Err(BatchError::Failed {
                        destination,
                        source,
                    })
                }
            };
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::dispatch::{DispatchError, QueueConfig};
    use crate::perf::PerformanceRecorder;

    #[derive(Default)]
    struct RecordingSheets {
        calls: Mutex<Vec<(SheetCall, Instant)>>,
        reject_destination: Option<&'static str>,
    }

    impl RecordingSheets {
        fn calls(&self) -> Vec<SheetCall> {
            self.calls
                .lock()
                .expect("calls lock")
                .iter()
                .map(|(call, _)| call.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingSheets {
        type Payload = SheetCall;
        type Output = ();

        async fn dispatch(&self, call: &SheetCall) -> Result<(), DispatchError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((call.clone(), Instant::now()));
            if self.reject_destination == Some(call.destination()) {
                return Err(DispatchError::permanent("destination not found"));
            }
            Ok(())
        }
    }

    fn batcher(
        config: BatcherConfig,
        sheets: RecordingSheets,
    ) -> (RequestBatcher<RecordingSheets>, Arc<RequestQueue<RecordingSheets>>) {
        let queue = Arc::new(RequestQueue::new(
            QueueConfig::sheets(),
            sheets,
            Arc::new(PerformanceRecorder::default()),
        ));
        (RequestBatcher::new(config, Arc::clone(&queue)), queue)
    }

    fn row(label: &str) -> Vec<serde_json::Value> {
        vec![json!(label)]
    }

    #[tokio::test(start_paused = true)]
    async fn three_appends_flush_together_at_max_wait() {
        let (batcher, queue) = batcher(BatcherConfig::default(), RecordingSheets::default());
        let started = Instant::now();

        let tickets: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|label| {
                batcher.queue_operation(BatchedOperation::append("sheet-1", vec![row(label)]))
            })
            .collect();
        assert_eq!(batcher.pending(), 3);

        for outcome in join_all(tickets).await {
            assert_eq!(outcome, Ok(()));
        }

        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(
            queue.dispatcher().calls(),
            vec![SheetCall::Append {
                destination: "sheet-1".into(),
                rows: vec![row("a"), row("b"), row("c")],
            }]
        );
        assert_eq!(batcher.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_batch_size_flushes_immediately() {
        let config = BatcherConfig {
            batch_size: std::num::NonZeroUsize::new(2).expect("non-zero"),
            ..BatcherConfig::default()
        };
        let (batcher, queue) = batcher(config, RecordingSheets::default());
        let started = Instant::now();

        let first = batcher.queue_operation(BatchedOperation::append("sheet-1", vec![row("a")]));
        let second = batcher.queue_operation(BatchedOperation::append("sheet-1", vec![row("b")]));

        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(queue.dispatcher().calls().len(), 1);
        assert_eq!(batcher.stats().flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_deadline_does_not_flush_reopened_group() {
        let config = BatcherConfig {
            batch_size: std::num::NonZeroUsize::new(2).expect("non-zero"),
            ..BatcherConfig::default()
        };
        let (batcher, _queue) = batcher(config, RecordingSheets::default());

        let _ = batcher.queue_operation(BatchedOperation::append("sheet-1", vec![row("a")]));
        let _ = batcher.queue_operation(BatchedOperation::append("sheet-1", vec![row("b")]));

        sleep(Duration::from_millis(1000)).await;
        let reopened_at = Instant::now();
        let late = batcher.queue_operation(BatchedOperation::append("sheet-1", vec![row("c")]));

        assert_eq!(late.await, Ok(()));
        assert_eq!(reopened_at.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_group_merges_updates_and_runs_creates_individually() {
        let (batcher, queue) = batcher(BatcherConfig::default(), RecordingSheets::default());

        let tickets = vec![
            batcher.queue_operation(BatchedOperation::update("sheet-1", "A1", vec![row("x")])),
            batcher.queue_operation(BatchedOperation::create("sheet-1", vec![row("h1")])),
            batcher.queue_operation(BatchedOperation::update("sheet-1", "A2", vec![row("y")])),
            batcher.queue_operation(BatchedOperation::create("sheet-1", vec![row("h2")])),
        ];
        assert_eq!(batcher.flush_all(), 1);

        for outcome in join_all(tickets).await {
            assert_eq!(outcome, Ok(()));
        }

        let calls = queue.dispatcher().calls();
        let mut labels: Vec<_> = calls.iter().map(SheetCall::label).collect();
        labels.sort_unstable();
        assert_eq!(labels, vec!["batch_update", "create", "create"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_call_rejects_whole_group() {
        let sheets = RecordingSheets {
            reject_destination: Some("missing"),
            ..RecordingSheets::default()
        };
        let (batcher, _queue) = batcher(BatcherConfig::default(), sheets);

        let tickets = vec![
            batcher.queue_operation(BatchedOperation::append("missing", vec![row("a")])),
            batcher.queue_operation(BatchedOperation::update("missing", "A1", vec![row("b")])),
        ];
        let healthy = batcher.queue_operation(BatchedOperation::append("sheet-1", vec![row("c")]));

        for outcome in join_all(tickets).await {
            assert!(matches!(
                outcome,
                Err(BatchError::Failed { ref destination, source: QueueError::Permanent { .. } })
                    if destination == "missing"
            ));
        }
        assert_eq!(healthy.await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn destinations_are_grouped_separately() {
        let (batcher, queue) = batcher(BatcherConfig::default(), RecordingSheets::default());

        let _ = batcher.queue_operation(BatchedOperation::append("sheet-1", vec![row("a")]));
        let _ = batcher.queue_operation(BatchedOperation::append("sheet-2", vec![row("b")]));
        assert_eq!(batcher.stats().open_groups, 2);

        assert_eq!(batcher.flush_all(), 2);
        assert!(queue.wait_idle(Duration::from_secs(5)).await);

        let mut destinations: Vec<_> = queue
            .dispatcher()
            .calls()
            .iter()
            .map(|call| call.destination().to_string())
            .collect();
        destinations.sort();
        assert_eq!(destinations, vec!["sheet-1", "sheet-2"]);
    }
}

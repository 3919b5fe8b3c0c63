use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::perf::{PerformanceRecorder, tags, with_timing};
use crate::util::lock::mutex_lock;

use super::Dispatcher;
use super::config::QueueConfig;
use super::error::{DispatchError, QueueError};
use super::events::{self, QueueEvent, QueueEventKind, duration_ms};
use super::request::{Priority, QueuedRequest};

const SOURCE: &str = "dispatch::queue";

type Request<D> = QueuedRequest<<D as Dispatcher>::Payload, <D as Dispatcher>::Output>;

/// Point-in-time view of a queue, reported on `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub name: &'static str,
    pub concurrency: usize,
    /// Waiting in a band, not yet dispatched.
    pub pending: usize,
    pub in_flight: usize,
    /// Failed transiently and sleeping before re-entering a band.
    pub backing_off: usize,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
}

/// Resolves with the final outcome of a request handed to
/// [`RequestQueue::submit`].
#[derive(Debug)]
pub struct Completion<O> {
    id: Uuid,
    queue: &'static str,
    receiver: oneshot::Receiver<Result<O, QueueError>>,
}

impl<O> Completion<O> {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<O> Future for Completion<O> {
    type Output = Result<O, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let queue = self.queue;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(QueueError::Closed { queue })))
    }
}

struct State<P, O> {
    bands: [VecDeque<QueuedRequest<P, O>>; 3],
    in_flight: usize,
    backing_off: usize,
}

impl<P, O> State<P, O> {
    fn new() -> Self {
        Self {
            bands: std::array::from_fn(|_| VecDeque::new()),
            in_flight: 0,
            backing_off: 0,
        }
    }

    fn pending(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.backing_off == 0 && self.pending() == 0
    }

    fn pop_next(&mut self) -> Option<QueuedRequest<P, O>> {
        let request = self.bands.iter_mut().find_map(VecDeque::pop_front)?;
        self.in_flight += 1;
        Some(request)
    }
}

struct Shared<D: Dispatcher> {
    config: QueueConfig,
    dispatcher: D,
    recorder: Arc<PerformanceRecorder>,
    state: Mutex<State<D::Payload, D::Output>>,
    work_available: Notify,
    idle: Notify,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<QueueEvent>,
    closed: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Priority-ordered, retrying worker pool with at most `concurrency` calls
/// in flight.
pub struct RequestQueue<D: Dispatcher> {
    shared: Arc<Shared<D>>,
    supervisor: JoinHandle<()>,
}

impl<D: Dispatcher> RequestQueue<D> {
    /// Build the queue and start its supervisor. Must be called inside a
    /// tokio runtime.
    pub fn new(config: QueueConfig, dispatcher: D, recorder: Arc<PerformanceRecorder>) -> Self {
        let shared = Arc::new(Shared {
            permits: Arc::new(Semaphore::new(config.concurrency.get())),
            config,
            dispatcher,
            recorder,
            state: Mutex::new(State::new()),
            work_available: Notify::new(),
            idle: Notify::new(),
            events: events::channel(),
            closed: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
        });

        let supervisor = tokio::spawn(Arc::clone(&shared).supervise());

        Self { shared, supervisor }
    }

    pub fn name(&self) -> &'static str {
        self.shared.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn dispatcher(&self) -> &D {
        &self.shared.dispatcher
    }

    /// Enqueue and return immediately. The outcome is only observable through
    /// events, logs and metrics.
    pub fn add(&self, payload: D::Payload, priority: Priority) -> Uuid {
        let max_retries = self.shared.config.max_retries;
        self.shared
            .enqueue(QueuedRequest::new(payload, priority, max_retries, None))
    }

    /// Enqueue and return a future resolving with the final outcome.
    pub fn submit(&self, payload: D::Payload, priority: Priority) -> Completion<D::Output> {
        let (sender, receiver) = oneshot::channel();
        let max_retries = self.shared.config.max_retries;
        let id = self.shared.enqueue(QueuedRequest::new(
            payload,
            priority,
            max_retries,
            Some(sender),
        ));
        Completion {
            id,
            queue: self.name(),
            receiver,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> QueueStats {
        let (pending, in_flight, backing_off) = {
            let state = mutex_lock(&self.shared.state, SOURCE, "stats");
            (state.pending(), state.in_flight, state.backing_off)
        };
        QueueStats {
            name: self.name(),
            concurrency: self.shared.config.concurrency.get(),
            pending,
            in_flight,
            backing_off,
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            retried: self.shared.retried.load(Ordering::Relaxed),
        }
    }

    /// Wait until nothing is pending, running or backing off.
    ///
    /// Returns `false` if `limit` elapsed first.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let shared = &self.shared;
        let wait = async {
            loop {
                let notified = shared.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                let idle = mutex_lock(&shared.state, SOURCE, "wait_idle").is_idle();
                if idle {
                    return;
                }
                notified.await;
            }
        };
        timeout(limit, wait).await.is_ok()
    }

    /// Stop dispatching. Requests still waiting in a band, and those that
    /// finish backing off afterwards, resolve with [`QueueError::Closed`].
    /// Calls already in flight run to completion.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<_> = {
            let mut state = mutex_lock(&self.shared.state, SOURCE, "shutdown");
            state.bands.iter_mut().flat_map(|band| band.drain(..)).collect()
        };
        info!(
            queue = self.name(),
            dropped = drained.len(),
            "Request queue shutting down"
        );
        for mut request in drained {
            request.respond(Err(QueueError::Closed {
                queue: self.name(),
            }));
        }
        self.shared.work_available.notify_one();
        self.shared.notify_if_idle();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl<D: Dispatcher> Drop for RequestQueue<D> {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

impl<D: Dispatcher> Shared<D> {
    fn enqueue(&self, mut request: Request<D>) -> Uuid {
        let id = request.id;
        if self.closed.load(Ordering::SeqCst) {
            warn!(queue = self.config.name, request_id = %id, "Request rejected by closed queue");
            request.respond(Err(QueueError::Closed {
                queue: self.config.name,
            }));
            return id;
        }

        let priority = request.priority;
        mutex_lock(&self.state, SOURCE, "enqueue").bands[priority.band()].push_back(request);
        self.publish(id, QueueEventKind::Enqueued { priority });
        self.work_available.notify_one();
        id
    }

    async fn supervise(self: Arc<Self>) {
        loop {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                return;
            };

            let (request, in_flight) = loop {
                if self.closed.load(Ordering::SeqCst) {
                    debug!(queue = self.config.name, "Queue supervisor stopped");
                    return;
                }
                let next = {
                    let mut state = mutex_lock(&self.state, SOURCE, "dispatch");
                    state.pop_next().map(|request| (request, state.in_flight))
                };
                match next {
                    Some(next) => break next,
                    None => self.work_available.notified().await,
                }
            };

            self.record_in_flight(in_flight);
            tokio::spawn(Arc::clone(&self).execute(request, permit));
        }
    }

    async fn execute(self: Arc<Self>, mut request: Request<D>, permit: OwnedSemaphorePermit) {
        let name = self.config.name;
        let call_timeout = self.config.call_timeout;
        if request.retries == 0 {
            histogram!("courier_queue_wait", "queue" => name)
                .record(request.enqueued_at.elapsed().as_secs_f64() * 1000.0);
        }
        self.publish(
            request.id,
            QueueEventKind::Started {
                attempt: request.retries + 1,
            },
        );

        let started_at = Instant::now();
        let metric_tags = tags([("queue", name), ("priority", request.priority.as_str())]);
        let outcome = with_timing(
            &self.recorder,
            &format!("{name}_dispatch"),
            metric_tags,
            || async {
                match timeout(call_timeout, self.dispatcher.dispatch(&request.payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Timeout(call_timeout)),
                }
            },
        )
        .await;

        match outcome {
            Ok(output) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.publish(
                    request.id,
                    QueueEventKind::Succeeded {
                        elapsed_ms: duration_ms(started_at.elapsed()),
                    },
                );
                request.respond(Ok(output));
                self.finish_attempt(false);
            }
            Err(source) if source.is_retryable() && request.retries < request.max_retries => {
                request.retries += 1;
                self.retried.fetch_add(1, Ordering::Relaxed);
                let backoff = self.config.backoff_for(request.retries);
                warn!(
                    queue = name,
                    request_id = %request.id,
                    retry = request.retries,
                    max_retries = request.max_retries,
                    backoff_ms = duration_ms(backoff),
                    error = %source,
                    "Transient failure, scheduling retry"
                );
                self.publish(
                    request.id,
                    QueueEventKind::retry_scheduled(request.retries, backoff, source.to_string()),
                );
                self.finish_attempt(true);

                let shared = Arc::clone(&self);
                tokio::spawn(async move {
                    sleep(backoff).await;
                    shared.requeue(request);
                });
            }
            Err(source) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let (kind, failure) = if source.is_retryable() {
                    (
                        QueueEventKind::RetriesExhausted {
                            retries: request.retries,
                            error: source.to_string(),
                        },
                        QueueError::RetriesExhausted {
                            id: request.id,
                            retries: request.retries,
                            source,
                        },
                    )
                } else {
                    (
                        QueueEventKind::PermanentFailure {
                            error: source.to_string(),
                        },
                        QueueError::Permanent {
                            id: request.id,
                            source,
                        },
                    )
                };
                error!(
                    queue = name,
                    request_id = %request.id,
                    priority = %request.priority,
                    error = %failure,
                    "Request dropped"
                );
                self.publish(request.id, kind);
                request.respond(Err(failure));
                self.finish_attempt(false);
            }
        }

        drop(permit);
    }

    /// Release the in-flight slot, optionally moving it to backing-off.
    fn finish_attempt(&self, backing_off: bool) {
        let in_flight = {
            let mut state = mutex_lock(&self.state, SOURCE, "finish_attempt");
            state.in_flight = state.in_flight.saturating_sub(1);
            if backing_off {
                state.backing_off += 1;
            }
            state.in_flight
        };
        self.record_in_flight(in_flight);
        self.notify_if_idle();
    }

    fn record_in_flight(&self, in_flight: usize) {
        gauge!("courier_queue_in_flight", "queue" => self.config.name).set(in_flight as f64);
    }

    fn requeue(&self, request: Request<D>) {
        let rejected = {
            let mut state = mutex_lock(&self.state, SOURCE, "requeue");
            state.backing_off = state.backing_off.saturating_sub(1);
            if self.closed.load(Ordering::SeqCst) {
                Some(request)
            } else {
                state.bands[request.priority.band()].push_front(request);
                None
            }
        };

        match rejected {
            Some(mut request) => {
                request.respond(Err(QueueError::Closed {
                    queue: self.config.name,
                }));
                self.notify_if_idle();
            }
            None => self.work_available.notify_one(),
        }
    }

    fn notify_if_idle(&self) {
        if mutex_lock(&self.state, SOURCE, "notify_if_idle").is_idle() {
            self.idle.notify_waiters();
        }
    }

    fn publish(&self, id: Uuid, kind: QueueEventKind) {
        counter!(
            "courier_queue_events_total",
            "queue" => self.config.name,
            "event" => kind.label()
        )
        .increment(1);
        debug!(queue = self.config.name, request_id = %id, event = kind.label(), "Queue event");
        // No subscribers is not an error.
        let _ = self.events.send(QueueEvent::new(self.config.name, id, kind));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;

    /// Echoes its payload after `delay`, failing with scripted errors first.
    #[derive(Default)]
    struct Scripted {
        delay: Duration,
        delays: HashMap<String, Duration>,
        failures: Mutex<HashMap<String, VecDeque<DispatchError>>>,
        calls: Mutex<Vec<(String, Instant)>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Scripted {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn fail(self, payload: &str, errors: impl IntoIterator<Item = DispatchError>) -> Self {
            self.failures
                .lock()
                .expect("failures lock")
                .entry(payload.to_string())
                .or_default()
                .extend(errors);
            self
        }

        fn order(&self) -> Vec<String> {
            self.calls
                .lock()
                .expect("calls lock")
                .iter()
                .map(|(payload, _)| payload.clone())
                .collect()
        }

        fn offsets_ms(&self) -> Vec<u64> {
            let calls = self.calls.lock().expect("calls lock");
            let Some((_, first)) = calls.first() else {
                return Vec::new();
            };
            calls
                .iter()
                .map(|(_, at)| duration_ms(at.duration_since(*first)))
                .collect()
        }
    }

    #[async_trait]
    impl Dispatcher for Scripted {
        type Payload = String;
        type Output = String;

        async fn dispatch(&self, payload: &String) -> Result<String, DispatchError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.calls
                .lock()
                .expect("calls lock")
                .push((payload.clone(), Instant::now()));

            sleep(self.delays.get(payload).copied().unwrap_or(self.delay)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let scripted = self
                .failures
                .lock()
                .expect("failures lock")
                .get_mut(payload)
                .and_then(VecDeque::pop_front);
            match scripted {
                Some(error) => Err(error),
                None => Ok(payload.to_uppercase()),
            }
        }
    }

    fn queue(config: QueueConfig, dispatcher: Scripted) -> RequestQueue<Scripted> {
        RequestQueue::new(config, dispatcher, Arc::new(PerformanceRecorder::default()))
    }

    fn single_worker() -> QueueConfig {
        QueueConfig::new("test", 1, Duration::from_secs(10))
    }

    const IDLE_LIMIT: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn drains_by_priority_then_fifo() {
        let queue = queue(
            single_worker(),
            Scripted::with_delay(Duration::from_millis(10)),
        );

        queue.add("low".into(), Priority::Low);
        queue.add("medium-1".into(), Priority::Medium);
        queue.add("high".into(), Priority::High);
        queue.add("medium-2".into(), Priority::Medium);

        assert!(queue.wait_idle(IDLE_LIMIT).await);
        assert_eq!(
            queue.dispatcher().order(),
            vec!["high", "medium-1", "medium-2", "low"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retried_request_returns_to_front_of_band() {
        let config = single_worker().with_backoff_base(Duration::from_millis(10));
        let dispatcher = Scripted::with_delay(Duration::from_millis(100))
            .fail("a", [DispatchError::transient("503")]);
        let queue = queue(config, dispatcher);

        for payload in ["a", "b", "c"] {
            queue.add(payload.into(), Priority::Medium);
        }

        assert!(queue.wait_idle(IDLE_LIMIT).await);
        assert_eq!(queue.dispatcher().order(), vec!["a", "b", "a", "c"]);
        assert_eq!(queue.stats().retried, 1);
        assert_eq!(queue.stats().completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency() {
        let config = QueueConfig::new("test", 2, Duration::from_secs(10));
        let queue = queue(config, Scripted::with_delay(Duration::from_millis(50)));

        for index in 0..6 {
            queue.add(format!("job-{index}"), Priority::Medium);
        }

        assert!(queue.wait_idle(IDLE_LIMIT).await);
        let dispatcher = queue.dispatcher();
        assert_eq!(dispatcher.peak.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.offsets_ms(), vec![0, 0, 50, 50, 100, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn backs_off_exponentially_until_retries_exhausted() {
        let config = single_worker()
            .with_backoff_base(Duration::from_millis(100))
            .with_max_retries(3);
        let dispatcher =
            Scripted::default().fail("flaky", (0..4).map(|_| DispatchError::transient("503")));
        let queue = queue(config, dispatcher);
        let mut events = queue.subscribe();

        let outcome = queue.submit("flaky".into(), Priority::High).await;

        match outcome {
            Err(QueueError::RetriesExhausted { retries, source, .. }) => {
                assert_eq!(retries, 3);
                assert_eq!(source, DispatchError::transient("503"));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert_eq!(queue.dispatcher().offsets_ms(), vec![0, 200, 600, 1400]);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind.label());
        }
        assert_eq!(kinds.last(), Some(&"retries_exhausted"));
        assert_eq!(
            kinds.iter().filter(|kind| **kind == "retry_scheduled").count(),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_transient() {
        let config = QueueConfig::new("test", 1, Duration::from_secs(10))
            .with_backoff_base(Duration::from_millis(100))
            .with_max_retries(1);
        let queue = queue(config, Scripted::with_delay(Duration::from_secs(20)));

        let outcome = queue.submit("slow".into(), Priority::Medium).await;

        assert!(matches!(
            outcome,
            Err(QueueError::RetriesExhausted {
                retries: 1,
                source: DispatchError::Timeout(limit),
                ..
            }) if limit == Duration::from_secs(10)
        ));
        assert_eq!(queue.dispatcher().order().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let dispatcher = Scripted::default().fail("bad", [DispatchError::permanent("400")]);
        let queue = queue(single_worker(), dispatcher);
        let mut events = queue.subscribe();

        let outcome = queue.submit("bad".into(), Priority::Medium).await;

        assert!(matches!(outcome, Err(QueueError::Permanent { .. })));
        assert_eq!(queue.dispatcher().order(), vec!["bad"]);
        assert_eq!(queue.stats().failed, 1);

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event.kind);
        }
        assert_eq!(
            last,
            Some(QueueEventKind::PermanentFailure {
                error: "permanent failure: 400".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ten_webhooks_run_five_at_a_time() {
        let recorder = Arc::new(PerformanceRecorder::default());
        let delays = (0..10)
            .map(|index| {
                let delay = if index < 5 { 200 } else { 50 };
                (format!("hook-{index}"), Duration::from_millis(delay))
            })
            .collect();
        let dispatcher = Scripted {
            delays,
            ..Scripted::default()
        };
        let queue = RequestQueue::new(QueueConfig::webhook(), dispatcher, Arc::clone(&recorder));
        let started = Instant::now();

        for index in 0..10 {
            queue.add(format!("hook-{index}"), Priority::Medium);
        }

        assert!(queue.wait_idle(IDLE_LIMIT).await);
        assert_eq!(started.elapsed(), Duration::from_millis(250));

        let dispatcher = queue.dispatcher();
        assert_eq!(dispatcher.peak.load(Ordering::SeqCst), 5);
        assert_eq!(
            dispatcher.offsets_ms(),
            vec![0, 0, 0, 0, 0, 200, 200, 200, 200, 200]
        );

        let stats = queue.stats();
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(
            recorder
                .metrics(Some("webhook_dispatch"), Duration::from_secs(60))
                .len(),
            10
        );
    }

    #[tokio::test(start_paused = true)]
    async fn submit_resolves_with_output() {
        let queue = queue(single_worker(), Scripted::default());
        let completion = queue.submit("hello".into(), Priority::High);
        assert_eq!(completion.await, Ok("HELLO".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_times_out_while_busy() {
        let queue = queue(single_worker(), Scripted::with_delay(Duration::from_secs(5)));
        queue.add("long".into(), Priority::Medium);

        assert!(!queue.wait_idle(Duration::from_secs(1)).await);
        assert!(queue.wait_idle(Duration::from_secs(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_pending_requests() {
        let queue = queue(single_worker(), Scripted::with_delay(Duration::from_secs(1)));
        let running = queue.submit("first".into(), Priority::Medium);
        let waiting = queue.submit("second".into(), Priority::Medium);

        sleep(Duration::from_millis(1)).await;
        queue.shutdown();

        assert_eq!(running.await, Ok("FIRST".to_string()));
        assert_eq!(waiting.await, Err(QueueError::Closed { queue: "test" }));
        assert_eq!(
            queue.submit("late".into(), Priority::High).await,
            Err(QueueError::Closed { queue: "test" })
        );
        assert!(queue.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_request_backing_off() {
        let config = single_worker().with_backoff_base(Duration::from_secs(1));
        let dispatcher = Scripted::with_delay(Duration::from_millis(10))
            .fail("flaky", [DispatchError::transient("503")]);
        let queue = queue(config, dispatcher);

        let completion = queue.submit("flaky".into(), Priority::High);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.stats().backing_off, 1);

        queue.shutdown();

        assert_eq!(completion.await, Err(QueueError::Closed { queue: "test" }));
        assert!(queue.wait_idle(IDLE_LIMIT).await);
        assert_eq!(queue.dispatcher().order(), vec!["flaky"]);
        let stats = queue.stats();
        assert_eq!(stats.backing_off, 0);
        assert_eq!(stats.retried, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_limit_fails_on_first_transient_error() {
        let dispatcher = Scripted::default().fail("flaky", [DispatchError::transient("503")]);
        let queue = queue(single_worker().with_max_retries(0), dispatcher);

        let outcome = queue.submit("flaky".into(), Priority::Medium).await;

        assert!(matches!(
            outcome,
            Err(QueueError::RetriesExhausted { retries: 0, .. })
        ));
        assert_eq!(queue.stats().retried, 0);
    }
}

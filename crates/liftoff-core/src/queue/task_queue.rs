//! In-process task queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::stats::{Timings, millis};
use super::{QueueConfig, QueueState, QueueStats, TaskHandler, TaskRecord, TaskSnapshot};
use crate::error::{DeployError, QueueError};

/// `None` until the queue finishes, then the outcome every waiter receives.
type Completion = Option<Result<(), QueueError>>;

/// Bounded-concurrency task queue.
///
/// Design:
/// - `add` appends and dispatches right away if a slot is free.
/// - Each dispatched task runs on its own tokio task and keeps its slot until
///   it succeeds or fails for good (backoff waits included).
/// - Completion is broadcast through a `watch` channel so any number of
///   `wait()` callers see the same result.
///
/// Handles are cheap to clone; all clones drive the same queue.
pub struct TaskQueue<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Send + 'static> {
    config: QueueConfig,
    handler: Arc<dyn TaskHandler<T>>,
    shared: Mutex<Shared<T>>,
    completion: watch::Sender<Completion>,
}

/// Mutable queue state. The lock is never held across an await.
struct Shared<T> {
    records: Vec<TaskRecord<T>>,

    /// Index of the next record to dispatch.
    cursor: usize,

    /// Tasks holding a slot (running or waiting out a backoff).
    active: usize,

    state: QueueState,
    timings: Timings,
    success: usize,
    errored: usize,
    retried: usize,
    started_at: Instant,
}

impl<T: Clone + Send + 'static> TaskQueue<T> {
    pub fn new(config: QueueConfig, handler: impl TaskHandler<T> + 'static) -> Self {
        Self::with_handler(config, Arc::new(handler))
    }

    pub fn with_handler(mut config: QueueConfig, handler: Arc<dyn TaskHandler<T>>) -> Self {
        config.concurrency = config.concurrency.max(1);
        let (completion, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                shared: Mutex::new(Shared {
                    records: Vec::new(),
                    cursor: 0,
                    active: 0,
                    state: QueueState::Open,
                    timings: Timings::default(),
                    success: 0,
                    errored: 0,
                    retried: 0,
                    started_at: Instant::now(),
                }),
                completion,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Append a task and try to start it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add(&self, task: T) -> Result<(), QueueError> {
        {
            let mut shared = self.inner.lock();
            if !shared.state.accepts_tasks() {
                return Err(QueueError::Closed {
                    queue: self.inner.config.name.clone(),
                });
            }
            shared.records.push(TaskRecord::new(task));
        }
        self.process();
        Ok(())
    }

    /// Declare that no more tasks will be added.
    pub fn close(&self) {
        {
            let mut shared = self.inner.lock();
            if shared.state == QueueState::Open {
                shared.state = QueueState::Closed;
            }
        }
        self.inner.finish_if_idle();
    }

    /// Start as many queued tasks as there are free slots.
    pub fn process(&self) {
        Inner::process(&self.inner);
    }

    /// Resolves once the queue is closed and drained, or fails with the first
    /// task that could not be completed.
    pub async fn wait(&self) -> Result<(), QueueError> {
        let mut rx = self.inner.completion.subscribe();
        let completion = match rx.wait_for(Option::is_some).await {
            Ok(done) => (*done).clone(),
            Err(_) => None,
        };
        completion.unwrap_or_else(|| {
            Err(QueueError::Closed {
                queue: self.inner.config.name.clone(),
            })
        })
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().state == QueueState::Finished
    }

    /// Per-task state, attempts and last error, in submission order.
    pub fn records(&self) -> Vec<TaskSnapshot> {
        let shared = self.inner.lock();
        shared
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| record.snapshot(index))
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let shared = self.inner.lock();
        QueueStats {
            min: shared.timings.min_ms(),
            max: shared.timings.max_ms(),
            avg: shared.timings.avg_ms(),
            active: shared.active,
            complete: shared.success + shared.errored,
            success: shared.success,
            errored: shared.errored,
            retried: shared.retried,
            total: shared.records.len(),
            elapsed: millis(shared.started_at.elapsed()),
        }
    }
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn process(this: &Arc<Self>) {
        let dispatched = {
            let mut shared = this.lock();
            let mut dispatched = Vec::new();
            if shared.state == QueueState::Finished {
                return;
            }
            while shared.active < this.config.concurrency && shared.cursor < shared.records.len() {
                let index = shared.cursor;
                shared.cursor += 1;
                if let Some(task) = shared.records[index].dispatch() {
                    shared.active += 1;
                    dispatched.push((index, task));
                }
            }
            dispatched
        };

        for (index, task) in dispatched {
            tokio::spawn(Self::run(Arc::clone(this), index, task));
        }
        this.finish_if_idle();
    }

    async fn run(this: Arc<Self>, index: usize, task: T) {
        let mut retries = 0;
        loop {
            this.lock().records[index].start_attempt();
            let started = Instant::now();
            match this.handler.handle(task.clone()).await {
                Ok(()) => {
                    this.on_success(index, started.elapsed());
                    break;
                }
                Err(err) if retries < this.config.retries && err.is_retryable() => {
                    retries += 1;
                    let delay = this.config.retry_policy.next_delay(retries);
                    this.on_retry(index, &err, retries, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    this.on_failure(index, retries + 1, err);
                    break;
                }
            }
        }
        Self::process(&this);
    }

    fn on_success(&self, index: usize, elapsed: Duration) {
        let mut shared = self.lock();
        shared.records[index].mark_succeeded();
        shared.timings.record(elapsed);
        shared.success += 1;
        shared.active -= 1;
    }

    fn on_retry(&self, index: usize, err: &DeployError, retry: u32, delay: Duration) {
        {
            let mut shared = self.lock();
            shared.records[index].schedule_retry(err.to_string());
            shared.retried += 1;
        }
        tracing::debug!(
            queue = %self.config.name,
            task = index,
            retry,
            delay_ms = millis(delay),
            error = %err,
            "retrying task"
        );
    }

    fn on_failure(&self, index: usize, attempts: u32, err: DeployError) {
        let source = Arc::new(err);
        {
            let mut shared = self.lock();
            shared.records[index].mark_errored(source.to_string());
            shared.errored += 1;
            shared.active -= 1;
            if shared.state == QueueState::Finished {
                return;
            }
            shared.state = QueueState::Finished;
        }
        tracing::debug!(
            queue = %self.config.name,
            task = index,
            attempts,
            error = %source,
            "task failed, finishing queue"
        );
        self.completion
            .send_replace(Some(Err(QueueError::RetriesExhausted {
                queue: self.config.name.clone(),
                index,
                attempts,
                source,
            })));
    }

    fn finish_if_idle(&self) -> bool {
        let finished = {
            let mut shared = self.lock();
            let idle = shared.state == QueueState::Closed
                && shared.cursor == shared.records.len()
                && shared.active == 0;
            if idle {
                shared.state = QueueState::Finished;
            }
            idle
        };
        if finished {
            self.completion.send_replace(Some(Ok(())));
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use super::*;
    use crate::queue::{TaskState, handler_fn};

    fn counting_queue(config: QueueConfig, calls: Arc<AtomicU32>, fail_with: Option<u16>) -> TaskQueue<u32> {
        TaskQueue::new(
            config,
            handler_fn(move |_task: u32| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    match fail_with {
                        Some(0) => Err(DeployError::transport("connection reset")),
                        Some(status) => Err(DeployError::HttpStatus {
                            status,
                            body: "rejected".to_string(),
                        }),
                        None => Ok(()),
                    }
                }
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn active_tasks_never_exceed_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tracked, observed) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let queue = TaskQueue::<usize>::new(
            QueueConfig::named("bounded").concurrency(3),
            handler_fn(move |_task: usize| {
                let in_flight = Arc::clone(&tracked);
                let peak = Arc::clone(&observed);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        for task in 0..20 {
            queue.add(task).unwrap();
            assert!(queue.stats().active <= 3);
        }
        queue.close();
        queue.wait().await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        let stats = queue.stats();
        assert_eq!(stats.success, 20);
        assert_eq!(stats.total, 20);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_of_one_runs_in_submission_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        let queue = TaskQueue::<u32>::new(
            QueueConfig::named("serial").concurrency(1),
            handler_fn(move |task: u32| {
                let seen = Arc::clone(&seen);
                async move {
                    // Later tasks finish faster, so only strict FIFO keeps the order.
                    tokio::time::sleep(Duration::from_millis(u64::from(10 - task))).await;
                    seen.lock().unwrap().push(task);
                    Ok(())
                }
            }),
        );

        for task in 0..5 {
            queue.add(task).unwrap();
        }
        queue.close();
        queue.wait().await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn task_failing_twice_then_succeeding_is_retried() {
        let failures = Arc::new(Mutex::new(HashMap::<u32, u32>::new()));
        let counter = Arc::clone(&failures);
        let queue = TaskQueue::<u32>::new(
            QueueConfig::named("scenario")
                .concurrency(2)
                .retries(3)
                .backoff(Duration::from_millis(100)),
            handler_fn(move |task: u32| {
                let counter = Arc::clone(&counter);
                async move {
                    if task == 3 {
                        let mut seen = counter.lock().unwrap();
                        let failed = seen.entry(task).or_insert(0);
                        if *failed < 2 {
                            *failed += 1;
                            return Err(DeployError::transport("connection reset"));
                        }
                    }
                    Ok(())
                }
            }),
        );

        for task in 1..=5 {
            queue.add(task).unwrap();
        }
        queue.close();
        queue.wait().await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.success, 5);
        assert_eq!(stats.errored, 0);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.complete, 5);

        let records = queue.records();
        assert!(records.iter().all(|record| record.state == TaskState::Succeeded));
        assert_eq!(records[2].attempts, 3);
        assert_eq!(records[2].last_error.as_deref(), Some("request failed: connection reset"));
        assert_eq!(records[0].attempts, 1);
        assert_eq!(records[0].last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_reject_the_queue() {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = counting_queue(
            QueueConfig::named("doomed").retries(2),
            Arc::clone(&calls),
            Some(0),
        );

        queue.add(7).unwrap();
        queue.close();
        let err = queue.wait().await.unwrap_err();

        assert!(matches!(
            err,
            QueueError::RetriesExhausted { attempts: 3, index: 0, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = queue.stats();
        assert_eq!(stats.errored, 1);
        assert_eq!(stats.retried, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = counting_queue(
            QueueConfig::named("client-error").retries(5),
            Arc::clone(&calls),
            Some(404),
        );

        queue.add(1).unwrap();
        queue.close();
        let err = queue.wait().await.unwrap_err();

        assert!(matches!(err, QueueError::RetriesExhausted { attempts: 1, .. }));
        assert!(matches!(
            err.task_error(),
            Some(DeployError::HttpStatus { status: 404, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_rejects_every_waiter_and_stops_dispatch() {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = counting_queue(
            QueueConfig::named("fail-fast").concurrency(1),
            Arc::clone(&calls),
            Some(400),
        );

        for task in 0..3 {
            queue.add(task).unwrap();
        }
        let (first, second) = tokio::join!(queue.wait(), queue.wait());

        assert!(first.is_err());
        assert!(second.is_err());
        assert!(queue.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let states: Vec<TaskState> = queue.records().iter().map(|record| record.state).collect();
        assert_eq!(states, vec![TaskState::Errored, TaskState::Queued, TaskState::Queued]);
    }

    #[tokio::test]
    async fn closed_empty_queue_resolves_immediately() {
        let queue = counting_queue(QueueConfig::named("empty"), Arc::new(AtomicU32::new(0)), None);
        queue.close();
        queue.wait().await.unwrap();
        assert!(queue.is_finished());
        assert_eq!(queue.stats().total, 0);
    }

    #[tokio::test]
    async fn add_after_close_is_an_error() {
        let queue = counting_queue(QueueConfig::named("sealed"), Arc::new(AtomicU32::new(0)), None);
        queue.close();
        let err = queue.add(1).unwrap_err();
        assert!(matches!(err, QueueError::Closed { ref queue } if queue == "sealed"));
    }

    #[tokio::test(start_paused = true)]
    async fn open_queue_does_not_resolve() {
        let queue = counting_queue(QueueConfig::named("open"), Arc::new(AtomicU32::new(0)), None);
        queue.add(1).unwrap();
        let waited = tokio::time::timeout(Duration::from_secs(5), queue.wait()).await;
        assert!(waited.is_err());

        queue.close();
        queue.wait().await.unwrap();
    }
}

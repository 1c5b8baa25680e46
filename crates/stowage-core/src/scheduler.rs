//! Concurrency-limited job scheduler.
//!
//! Every submitted job gets its own Tokio task so a panic in one job cannot
//! take down another. At most `max_concurrency` jobs run at once; the rest
//! wait in a FIFO queue and are promoted one-for-one as running jobs finish.
//! Queue and running set live behind a single lock, so a completion and its
//! promotion happen atomically.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::errors::{TaskError, TaskId};

/// A unit of work the scheduler can run.
///
/// The job value itself is the task's input payload; `run` consumes it.
#[async_trait]
pub trait Job: Send + 'static {
    type Output: Send + 'static;

    /// Short label used in logs and errors (`"copy"`, `"metadata"`, ...).
    fn kind(&self) -> &'static str;

    async fn run(self) -> Result<Self::Output>;
}

/// Completion handle returned by [`TaskScheduler::submit`].
pub struct TaskHandle<T> {
    id: TaskId,
    kind: &'static str,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the job to finish.
    pub async fn join(self) -> Result<T, TaskError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskError::Aborted {
                id: self.id,
                kind: self.kind,
                reason: "completion channel dropped before a result was sent".to_string(),
            }),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

struct PendingTask {
    id: TaskId,
    kind: &'static str,
    launch: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<PendingTask>,
    running: HashSet<TaskId>,
}

struct SchedulerInner {
    max_concurrency: usize,
    next_id: AtomicU64,
    state: Mutex<SchedulerState>,
}

/// Cloneable handle to one worker pool.
///
/// `submit` spawns onto the ambient Tokio runtime and must be called from
/// within one.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                max_concurrency: max_concurrency.max(1),
                next_id: AtomicU64::new(1),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    pub fn running(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Queue a job and return a handle to its eventual result.
    pub fn submit<J: Job>(&self, job: J) -> TaskHandle<J::Output> {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let kind = job.kind();
        let (tx, rx) = oneshot::channel();

        let inner = Arc::clone(&self.inner);
        let launch = Box::new(move || supervise(inner, id, kind, job, tx).boxed());
        let pending = PendingTask { id, kind, launch };

        let start_now = {
            let mut state = self.inner.state.lock();
            if state.queue.is_empty() && state.running.len() < self.inner.max_concurrency {
                state.running.insert(id);
                Some(pending)
            } else {
                log::debug!(
                    "queueing {kind} job {id} ({} running, {} queued)",
                    state.running.len(),
                    state.queue.len() + 1
                );
                state.queue.push_back(pending);
                None
            }
        };

        if let Some(task) = start_now {
            start(task);
        }

        TaskHandle { id, kind, rx }
    }
}

impl SchedulerInner {
    /// Retire a finished task and promote the oldest queued one, if any.
    fn complete(&self, id: TaskId) {
        let next = {
            let mut state = self.state.lock();
            state.running.remove(&id);
            if state.running.len() < self.max_concurrency {
                let next = state.queue.pop_front();
                if let Some(task) = &next {
                    state.running.insert(task.id);
                }
                next
            } else {
                None
            }
        };
        if let Some(task) = next {
            start(task);
        }
    }
}

fn start(task: PendingTask) {
    log::debug!("starting {} job {}", task.kind, task.id);
    tokio::spawn((task.launch)());
}

async fn supervise<J: Job>(
    inner: Arc<SchedulerInner>,
    id: TaskId,
    kind: &'static str,
    job: J,
    tx: oneshot::Sender<Result<J::Output, TaskError>>,
) {
    let outcome = match tokio::spawn(job.run()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(report)) => Err(TaskError::Failed { id, kind, report }),
        Err(join_err) => {
            let reason = if join_err.is_panic() {
                "job panicked".to_string()
            } else {
                join_err.to_string()
            };
            Err(TaskError::Aborted { id, kind, reason })
        }
    };

    match &outcome {
        Ok(_) => log::debug!("{kind} job {id} finished"),
        Err(err) => log::warn!("{err}"),
    }

    // Slot is released before the caller can observe the result.
    inner.complete(id);
    let _ = tx.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::eyre;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};

    /// Job that records its start and then waits for a release permit.
    struct GatedJob {
        label: usize,
        started: mpsc::UnboundedSender<usize>,
        gate: Arc<Semaphore>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for GatedJob {
        type Output = usize;

        fn kind(&self) -> &'static str {
            "gated"
        }

        async fn run(self) -> Result<usize> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _ = self.started.send(self.label);
            let permit = self.gate.acquire().await?;
            permit.forget();
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(self.label)
        }
    }

    struct FailingJob;

    #[async_trait]
    impl Job for FailingJob {
        type Output = ();

        fn kind(&self) -> &'static str {
            "failing"
        }

        async fn run(self) -> Result<()> {
            Err(eyre!("disk full: /tmp/out"))
        }
    }

    struct PanickingJob;

    #[async_trait]
    impl Job for PanickingJob {
        type Output = ();

        fn kind(&self) -> &'static str {
            "panicking"
        }

        async fn run(self) -> Result<()> {
            panic!("worker blew up");
        }
    }

    struct ValueJob(u32);

    #[async_trait]
    impl Job for ValueJob {
        type Output = u32;

        fn kind(&self) -> &'static str {
            "value"
        }

        async fn run(self) -> Result<u32> {
            Ok(self.0 * 2)
        }
    }

    struct Harness {
        started_tx: mpsc::UnboundedSender<usize>,
        started_rx: mpsc::UnboundedReceiver<usize>,
        gate: Arc<Semaphore>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            let (started_tx, started_rx) = mpsc::unbounded_channel();
            Self {
                started_tx,
                started_rx,
                gate: Arc::new(Semaphore::new(0)),
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn job(&self, label: usize) -> GatedJob {
            GatedJob {
                label,
                started: self.started_tx.clone(),
                gate: Arc::clone(&self.gate),
                active: Arc::clone(&self.active),
                peak: Arc::clone(&self.peak),
            }
        }

        async fn next_start(&mut self) -> usize {
            tokio::time::timeout(Duration::from_secs(5), self.started_rx.recv())
                .await
                .expect("job start timed out")
                .expect("start channel closed")
        }

        async fn assert_no_start(&mut self) {
            let res = tokio::time::timeout(Duration::from_millis(100), self.started_rx.recv()).await;
            assert!(res.is_err(), "unexpected job start: {res:?}");
        }
    }

    #[tokio::test]
    async fn third_task_waits_for_a_free_slot() {
        let scheduler = TaskScheduler::new(2);
        let mut h = Harness::new();

        let first = scheduler.submit(h.job(1));
        let second = scheduler.submit(h.job(2));
        let third = scheduler.submit(h.job(3));

        let mut early = vec![h.next_start().await, h.next_start().await];
        early.sort();
        assert_eq!(early, vec![1, 2]);
        h.assert_no_start().await;
        assert_eq!(scheduler.running(), 2);
        assert_eq!(scheduler.queued(), 1);

        h.gate.add_permits(1);
        assert_eq!(h.next_start().await, 3);

        h.gate.add_permits(2);
        let mut results = vec![
            first.join().await.unwrap(),
            second.join().await.unwrap(),
            third.join().await.unwrap(),
        ];
        results.sort();
        assert_eq!(results, vec![1, 2, 3]);
        assert!(h.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.running(), 0);
        assert_eq!(scheduler.queued(), 0);
    }

    #[tokio::test]
    async fn queued_tasks_start_in_submission_order() {
        let scheduler = TaskScheduler::new(1);
        let mut h = Harness::new();

        let handles: Vec<_> = (0..5).map(|i| scheduler.submit(h.job(i))).collect();

        for expected in 0..5 {
            assert_eq!(h.next_start().await, expected);
            h.assert_no_start().await;
            h.gate.add_permits(1);
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().await.unwrap(), i);
        }
        assert_eq!(h.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let scheduler = TaskScheduler::new(3);
        let mut h = Harness::new();
        let handles: Vec<_> = (0..12).map(|i| scheduler.submit(h.job(i))).collect();

        for _ in 0..3 {
            h.next_start().await;
        }
        h.gate.add_permits(12);
        for handle in handles {
            handle.join().await.unwrap();
        }
        assert!(h.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn job_error_is_reported_and_slot_released() {
        let scheduler = TaskScheduler::new(1);

        let failing = scheduler.submit(FailingJob);
        let after = scheduler.submit(ValueJob(21));

        let err = failing.join().await.unwrap_err();
        assert!(matches!(err, TaskError::Failed { kind: "failing", .. }));
        assert!(err.to_string().contains("disk full"));
        assert_eq!(after.join().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn panic_only_fails_its_own_task() {
        let scheduler = TaskScheduler::new(1);

        let panicking = scheduler.submit(PanickingJob);
        let healthy = scheduler.submit(ValueJob(5));

        let err = panicking.join().await.unwrap_err();
        assert!(err.is_abnormal());
        assert_eq!(err.kind(), "panicking");
        assert_eq!(healthy.join().await.unwrap(), 10);
        assert_eq!(scheduler.running(), 0);
    }

    #[tokio::test]
    async fn ids_are_unique_and_increasing() {
        let scheduler = TaskScheduler::new(4);
        let a = scheduler.submit(ValueJob(1));
        let b = scheduler.submit(ValueJob(2));
        assert!(a.id() < b.id());
        a.join().await.unwrap();
        b.join().await.unwrap();
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        assert_eq!(TaskScheduler::new(0).max_concurrency(), 1);
    }
}

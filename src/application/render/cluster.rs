//! Bounded scheduler that runs render jobs on a fixed pool of browser workers.
//!
//! Jobs are admitted in FIFO order and dispatched by a single task that is
//! woken on every enqueue and every job completion. A job only starts when an
//! idle worker exists and fewer than `max_concurrent_jobs` jobs are running,
//! so `busy <= min(live workers, max_concurrent_jobs)` holds at all times.

use std::{
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use futures::{FutureExt, future::join_all};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{Notify, broadcast, watch},
    time,
};
use tracing::{debug, info, warn};

use crate::{application::error::error_chain, util::lock::mutex_lock};

use super::{
    engine::BrowserLauncher,
    events::{ClusterEvent, EventBus},
    fonts::FontInliner,
    job::{Job, PendingRender, RenderRequest},
    pool::WorkerPool,
    worker::{Worker, WorkerContext, WorkerError, panic_message},
};

const TARGET: &str = "pressroom::render::cluster";

pub const DEFAULT_MAX_WORKERS: usize = 2;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Hard cap on live browser processes.
    pub max_workers: usize,
    /// Cap on in-flight jobs, independent of the worker count.
    pub max_concurrent_jobs: usize,
    /// Render timeout for jobs without their own override.
    pub worker_timeout: Duration,
    pub navigation_timeout: Duration,
    /// How long `close()` waits for in-flight renders.
    pub shutdown_grace: Duration,
    pub event_capacity: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            navigation_timeout: DEFAULT_WORKER_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterPhase {
    Created,
    Starting,
    Ready,
    /// `init()` could not start a single worker. Terminal.
    Failed,
    Closing,
    Closed,
}

impl ClusterPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterPhase::Created => "created",
            ClusterPhase::Starting => "starting",
            ClusterPhase::Ready => "ready",
            ClusterPhase::Failed => "failed",
            ClusterPhase::Closing => "closing",
            ClusterPhase::Closed => "closed",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster is not ready")]
    NotReady,
    #[error("cluster was already initialized")]
    AlreadyInitialized,
    #[error("no browser worker could be started ({attempted} attempted)")]
    NoWorkersStarted { attempted: usize },
    #[error("cluster is closed")]
    Closed,
    #[error("render job was dropped before completion")]
    Abandoned,
    #[error("render job failed")]
    Job(#[from] WorkerError),
    #[error("{failed} worker(s) failed to shut down")]
    Shutdown { failed: usize },
}

impl ClusterError {
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterError::NotReady => "not_ready",
            ClusterError::AlreadyInitialized => "already_initialized",
            ClusterError::NoWorkersStarted { .. } => "launch",
            ClusterError::Closed => "closed",
            ClusterError::Abandoned => "abandoned",
            ClusterError::Job(err) => err.kind(),
            ClusterError::Shutdown { .. } => "shutdown",
        }
    }
}

/// Outcome of [`Cluster::close`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Workers shut down by this call.
    pub workers: usize,
    /// Queued jobs rejected because the cluster closed.
    pub pending_jobs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    pub phase: ClusterPhase,
    pub workers: usize,
    pub idle: usize,
    pub busy: usize,
    pub queued: usize,
}

struct ClusterState {
    phase: ClusterPhase,
    pool: WorkerPool,
    queue: VecDeque<Job>,
}

struct ClusterInner {
    options: ClusterOptions,
    launcher: Arc<dyn BrowserLauncher>,
    context: WorkerContext,
    state: Mutex<ClusterState>,
    wake: Notify,
    busy: watch::Sender<usize>,
    events: EventBus,
}

/// Handle to a worker pool. Cheap to clone; all clones share the same pool.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl Cluster {
    pub fn new(
        options: ClusterOptions,
        launcher: Arc<dyn BrowserLauncher>,
        fonts: FontInliner,
    ) -> Self {
        let context = WorkerContext {
            fonts,
            navigation_timeout: options.navigation_timeout,
        };
        let (busy, _) = watch::channel(0);
        let events = EventBus::new(options.event_capacity);
        Self {
            inner: Arc::new(ClusterInner {
                options,
                launcher,
                context,
                state: Mutex::new(ClusterState {
                    phase: ClusterPhase::Created,
                    pool: WorkerPool::default(),
                    queue: VecDeque::new(),
                }),
                wake: Notify::new(),
                busy,
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> ClusterStats {
        let state = mutex_lock(&self.inner.state, TARGET, "cluster::stats");
        ClusterStats {
            phase: state.phase,
            workers: state.pool.live(),
            idle: state.pool.idle(),
            busy: state.pool.busy(),
            queued: state.queue.len(),
        }
    }

    /// Launches the worker pool. Returns the number of workers started.
    ///
    /// Individual launch failures are tolerated; the cluster only fails when
    /// no worker at all could be started.
    pub async fn init(&self) -> Result<usize, ClusterError> {
        let inner = &self.inner;
        {
            let mut state = mutex_lock(&inner.state, TARGET, "cluster::init");
            if state.phase != ClusterPhase::Created {
                return Err(ClusterError::AlreadyInitialized);
            }
            state.phase = ClusterPhase::Starting;
        }

        let started_at = Instant::now();
        let attempted = inner.options.max_workers;
        let launches = (0..attempted).map(|id| Worker::launch(id, Arc::clone(&inner.launcher)));
        let mut workers = Vec::with_capacity(attempted);
        for (id, result) in join_all(launches).await.into_iter().enumerate() {
            match result {
                Ok(worker) => {
                    inner
                        .events
                        .publish(ClusterEvent::WorkerCreated { worker_id: id });
                    workers.push(worker);
                }
                Err(err) => {
                    warn!(
                        target = TARGET,
                        op = "cluster::init",
                        result = "worker_launch_failed",
                        worker_id = id,
                        error = %err,
                        chain = ?error_chain(&err),
                        "Browser worker failed to launch"
                    );
                    inner.events.publish(ClusterEvent::WorkerError {
                        worker_id: id,
                        error: error_chain(&err).join(": "),
                    });
                }
            }
        }

        if workers.is_empty() {
            mutex_lock(&inner.state, TARGET, "cluster::init").phase = ClusterPhase::Failed;
            let err = ClusterError::NoWorkersStarted { attempted };
            warn!(
                target = TARGET,
                op = "cluster::init",
                result = "failed",
                attempted,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "No browser worker could be started"
            );
            inner.events.publish(ClusterEvent::Error {
                job_id: None,
                worker_id: None,
                kind: err.kind(),
                error: err.to_string(),
            });
            return Err(err);
        }

        let count = workers.len();
        let closed_meanwhile = {
            let mut state = mutex_lock(&inner.state, TARGET, "cluster::init");
            if state.phase == ClusterPhase::Starting {
                state.pool = WorkerPool::new(workers);
                state.phase = ClusterPhase::Ready;
                None
            } else {
                Some(workers)
            }
        };
        if let Some(workers) = closed_meanwhile {
            join_all(workers.into_iter().map(|mut worker| async move { worker.close().await }))
                .await;
            return Err(ClusterError::Closed);
        }

        tokio::spawn(dispatch_loop(Arc::clone(inner)));

        info!(
            target = TARGET,
            op = "cluster::init",
            result = "ok",
            workers = count,
            attempted,
            max_concurrent_jobs = inner.options.max_concurrent_jobs,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Render cluster ready"
        );
        inner
            .events
            .publish(ClusterEvent::Initialized { workers: count });
        Ok(count)
    }

    /// Queues a render. Never fails synchronously; every outcome, including
    /// rejection of a cluster that is not ready, arrives through the future.
    pub fn execute(&self, request: RenderRequest) -> PendingRender {
        let inner = &self.inner;
        let mut state = mutex_lock(&inner.state, TARGET, "cluster::execute");
        match state.phase {
            ClusterPhase::Ready => {}
            ClusterPhase::Closing | ClusterPhase::Closed => {
                return PendingRender::rejected(ClusterError::Closed);
            }
            ClusterPhase::Created | ClusterPhase::Starting | ClusterPhase::Failed => {
                return PendingRender::rejected(ClusterError::NotReady);
            }
        }

        let (job, pending) = Job::new(request);
        let job_id = job.id();
        state.queue.push_back(job);
        let queued = state.queue.len();
        drop(state);

        metrics::gauge!("pressroom_queue_depth").set(queued as f64);
        inner
            .events
            .publish(ClusterEvent::Execute { job_id, queued });
        inner.wake.notify_one();
        pending
    }

    /// Shuts the pool down.
    ///
    /// Queued jobs are rejected with [`ClusterError::Closed`]; in-flight jobs
    /// get up to `shutdown_grace` to finish before every returned worker is
    /// closed. Workers still busy after that close themselves when their job
    /// ends. Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<CloseReport, ClusterError> {
        let inner = &self.inner;
        let pending = {
            let mut state = mutex_lock(&inner.state, TARGET, "cluster::close");
            match state.phase {
                ClusterPhase::Ready | ClusterPhase::Starting => {}
                ClusterPhase::Closing | ClusterPhase::Closed => {
                    return Ok(CloseReport::default());
                }
                ClusterPhase::Created | ClusterPhase::Failed => {
                    state.phase = ClusterPhase::Closed;
                    return Ok(CloseReport::default());
                }
            }
            state.phase = ClusterPhase::Closing;
            state.queue.drain(..).collect::<Vec<_>>()
        };
        inner.wake.notify_one();

        let started_at = Instant::now();
        let pending_jobs = pending.len();
        for job in pending {
            job.reject(ClusterError::Closed);
        }
        metrics::gauge!("pressroom_queue_depth").set(0.0);

        let mut busy = inner.busy.subscribe();
        let drained = time::timeout(
            inner.options.shutdown_grace,
            busy.wait_for(|in_flight| *in_flight == 0),
        )
        .await
        .is_ok();
        if !drained {
            warn!(
                target = TARGET,
                op = "cluster::close",
                result = "grace_elapsed",
                grace_ms = inner.options.shutdown_grace.as_millis() as u64,
                in_flight = *inner.busy.borrow(),
                "Shutdown grace elapsed with renders still in flight"
            );
        }

        let workers = {
            let mut state = mutex_lock(&inner.state, TARGET, "cluster::close");
            state.phase = ClusterPhase::Closed;
            state.pool.take_idle()
        };

        let results = join_all(workers.into_iter().map(|mut worker| async move {
            let id = worker.id();
            (id, worker.close().await)
        }))
        .await;

        let closed = results.len();
        let mut failed = 0;
        for (worker_id, result) in &results {
            if let Err(err) = result {
                failed += 1;
                warn!(
                    target = TARGET,
                    op = "cluster::close",
                    result = "worker_close_failed",
                    worker_id,
                    error = %err,
                    chain = ?error_chain(err),
                    "Browser worker failed to shut down"
                );
            }
        }

        let report = CloseReport {
            workers: closed,
            pending_jobs,
        };
        info!(
            target = TARGET,
            op = "cluster::close",
            result = if failed == 0 { "ok" } else { "partial" },
            workers = closed,
            pending_jobs,
            failed,
            drained,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Render cluster closed"
        );
        inner.events.publish(ClusterEvent::Close {
            workers: closed,
            pending_jobs,
        });

        if failed > 0 {
            let err = ClusterError::Shutdown { failed };
            inner.events.publish(ClusterEvent::Error {
                job_id: None,
                worker_id: None,
                kind: err.kind(),
                error: err.to_string(),
            });
            return Err(err);
        }
        Ok(report)
    }
}

async fn dispatch_loop(inner: Arc<ClusterInner>) {
    while inner.dispatch_pass() {
        inner.wake.notified().await;
    }
    debug!(
        target = TARGET,
        op = "cluster::dispatch",
        result = "stopped",
        "Dispatcher stopped"
    );
}

impl ClusterInner {
    /// Starts as many queued jobs as capacity allows. Returns `false` once the
    /// cluster stops accepting work.
    fn dispatch_pass(self: &Arc<Self>) -> bool {
        let limit = self.options.max_concurrent_jobs.max(1);
        let mut state = mutex_lock(&self.state, TARGET, "cluster::dispatch");
        match state.phase {
            ClusterPhase::Ready => {}
            ClusterPhase::Created | ClusterPhase::Starting => return true,
            ClusterPhase::Failed | ClusterPhase::Closing | ClusterPhase::Closed => return false,
        }

        let mut dispatched = 0_usize;
        while !state.queue.is_empty() && state.pool.busy() < limit {
            let Some((slot, worker)) = state.pool.checkout() else {
                break;
            };
            let Some(job) = state.queue.pop_front() else {
                state.pool.checkin(slot, worker);
                break;
            };
            dispatched += 1;
            tokio::spawn(run_job(Arc::clone(self), slot, worker, job));
        }

        let queued = state.queue.len();
        self.busy.send_replace(state.pool.busy());
        drop(state);

        if dispatched > 0 {
            metrics::gauge!("pressroom_queue_depth").set(queued as f64);
        }
        if queued == 0 && dispatched == 0 {
            self.events.publish(ClusterEvent::Idle);
        }
        true
    }

    /// Returns a worker after its job. While the cluster is running or
    /// draining the worker goes back to its slot; once closed it shuts down.
    async fn release(&self, slot: usize, worker: Worker) {
        let leftover = {
            let mut state = mutex_lock(&self.state, TARGET, "cluster::release");
            let leftover = if state.phase == ClusterPhase::Closed {
                state.pool.mark_closed(slot);
                Some(worker)
            } else {
                state.pool.checkin(slot, worker);
                None
            };
            self.busy.send_replace(state.pool.busy());
            leftover
        };

        if let Some(mut worker) = leftover
            && let Err(err) = worker.close().await
        {
            warn!(
                target = TARGET,
                op = "cluster::release",
                result = "worker_close_failed",
                worker_id = worker.id(),
                error = %err,
                "Late worker failed to shut down"
            );
        }

        self.wake.notify_one();
    }
}

async fn run_job(inner: Arc<ClusterInner>, slot: usize, mut worker: Worker, job: Job) {
    let job_id = job.id();
    let worker_id = worker.id();
    let timeout = job
        .request()
        .timeout
        .unwrap_or(inner.options.worker_timeout);
    debug!(
        target = TARGET,
        op = "cluster::dispatch",
        job_id = %job_id,
        worker_id,
        queued_ms = job.queued_for().as_millis() as u64,
        timeout_ms = timeout.as_millis() as u64,
        "Job dispatched"
    );

    let started_at = Instant::now();
    let outcome = AssertUnwindSafe(worker.handle(job_id, job.request(), timeout, &inner.context))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(WorkerError::Panicked(panic_message(panic.as_ref()))));
    let elapsed = started_at.elapsed();

    match outcome {
        Ok(pdf) => {
            inner.events.publish(ClusterEvent::Completed {
                job_id,
                worker_id,
                elapsed,
                bytes: pdf.len(),
            });
            job.resolve(pdf);
        }
        Err(err) => {
            inner.events.publish(ClusterEvent::Error {
                job_id: Some(job_id),
                worker_id: Some(worker_id),
                kind: err.kind(),
                error: error_chain(&err).join(": "),
            });
            job.reject(ClusterError::Job(err));
        }
    }

    inner.release(slot, worker).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;
    use tokio::time::Instant;

    use super::*;
    use crate::{
        application::render::testing::FakeEngine, domain::options::PdfOptions,
    };

    fn options(max_workers: usize, max_concurrent_jobs: usize) -> ClusterOptions {
        ClusterOptions {
            max_workers,
            max_concurrent_jobs,
            ..ClusterOptions::default()
        }
    }

    fn cluster(engine: &FakeEngine, options: ClusterOptions) -> Cluster {
        let fonts = FontInliner::new(Duration::from_secs(5)).expect("font client");
        Cluster::new(options, engine.launcher(), fonts)
    }

    fn request(html: &str) -> RenderRequest {
        RenderRequest::new(html, PdfOptions::default())
    }

    fn drain(rx: &mut broadcast::Receiver<ClusterEvent>) -> Vec<ClusterEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn names(events: &[ClusterEvent]) -> Vec<&'static str> {
        events.iter().map(ClusterEvent::name).collect()
    }

    /// Drops `idle` notifications, whose timing depends on when the
    /// dispatcher task gets polled.
    fn lifecycle(events: Vec<ClusterEvent>) -> Vec<ClusterEvent> {
        events
            .into_iter()
            .filter(|event| *event != ClusterEvent::Idle)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn two_workers_finish_four_jobs_in_two_rounds() {
        let engine = FakeEngine::new().with_render_delay(Duration::from_secs(1));
        let cluster = cluster(&engine, options(2, 5));
        assert_eq!(cluster.init().await.expect("init"), 2);

        let started = Instant::now();
        let pending: Vec<_> = (0..4)
            .map(|i| cluster.execute(request(&format!("<p>job {i}</p>"))))
            .collect();
        let results = join_all(pending).await;
        let elapsed = started.elapsed();

        assert!(results.iter().all(Result::is_ok));
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
        assert_eq!(engine.max_concurrent_renders(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_jobs_are_capped_below_worker_count() {
        let engine = FakeEngine::new().with_render_delay(Duration::from_secs(1));
        let cluster = cluster(&engine, options(4, 2));
        cluster.init().await.expect("init");

        let started = Instant::now();
        let pending: Vec<_> = (0..6)
            .map(|i| cluster.execute(request(&format!("<p>{i}</p>"))))
            .collect();
        let results = join_all(pending).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(engine.max_concurrent_renders(), 2);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_start_in_submission_order() {
        let engine = FakeEngine::new().with_render_delay(Duration::from_millis(100));
        let cluster = cluster(&engine, options(1, 4));
        cluster.init().await.expect("init");

        let pending: Vec<_> = (0..5)
            .map(|i| cluster.execute(request(&format!("job-{i}"))))
            .collect();
        join_all(pending).await;

        let renders = engine.renders();
        let order: Vec<_> = renders.iter().map(|call| call.content.as_str()).collect();
        assert_eq!(order, ["job-0", "job-1", "job-2", "job-3", "job-4"]);
        for pair in renders.windows(2) {
            assert!(pair[1].started_at - pair[0].started_at >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_job_does_not_poison_worker() {
        let engine = FakeEngine::new();
        let cluster = cluster(&engine, options(1, 1));
        cluster.init().await.expect("init");
        let mut events = cluster.subscribe();

        let slow = cluster.execute(request("SLOW").with_timeout(Duration::from_secs(1)));
        let fast = cluster.execute(request("<p>fine</p>"));

        let err = slow.await.expect_err("timed out");
        assert!(matches!(
            err,
            ClusterError::Job(WorkerError::Timeout { stage: "render", .. })
        ));
        let pdf = fast.await.expect("second job succeeds");
        assert!(pdf.starts_with(b"%PDF"));

        assert_eq!(engine.launches(), 1);
        assert_eq!(engine.pages_opened(), engine.pages_closed());
        let seen = names(&drain(&mut events));
        assert!(seen.contains(&"error"));
        assert!(seen.contains(&"completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_and_panicking_jobs_are_isolated() {
        let engine = FakeEngine::new();
        let cluster = cluster(&engine, options(1, 1));
        cluster.init().await.expect("init");

        let failed = cluster.execute(request("FAIL")).await;
        assert!(matches!(failed, Err(ClusterError::Job(WorkerError::Render(_)))));

        let panicked = cluster.execute(request("PANIC")).await;
        assert!(matches!(
            panicked,
            Err(ClusterError::Job(WorkerError::Panicked(_)))
        ));

        cluster
            .execute(request("<p>after</p>"))
            .await
            .expect("worker reused");
        assert_eq!(cluster.stats().idle, 1);
        assert_eq!(engine.pages_opened(), 3);
        assert_eq!(engine.pages_opened(), engine.pages_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn init_fails_when_no_worker_starts() {
        let engine = FakeEngine::new().with_failing_launches(2);
        let cluster = cluster(&engine, options(2, 2));
        let mut events = cluster.subscribe();

        let err = cluster.init().await.expect_err("fatal init");
        assert!(matches!(err, ClusterError::NoWorkersStarted { attempted: 2 }));
        assert_eq!(cluster.stats().phase, ClusterPhase::Failed);

        let seen = names(&drain(&mut events));
        assert_eq!(seen, ["worker-error", "worker-error", "error"]);

        assert!(matches!(
            cluster.execute(request("<p>x</p>")).await,
            Err(ClusterError::NotReady)
        ));
        assert!(matches!(
            cluster.init().await,
            Err(ClusterError::AlreadyInitialized)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn init_tolerates_partial_launch_failure() {
        let engine = FakeEngine::new().with_failing_launches(1);
        let cluster = cluster(&engine, options(3, 3));
        let mut events = cluster.subscribe();

        assert_eq!(cluster.init().await.expect("init"), 2);

        let events = lifecycle(drain(&mut events));
        let seen = names(&events);
        assert_eq!(seen.iter().filter(|name| **name == "worker-created").count(), 2);
        assert_eq!(seen.iter().filter(|name| **name == "worker-error").count(), 1);
        assert_eq!(events.last(), Some(&ClusterEvent::Initialized { workers: 2 }));
        assert_eq!(cluster.stats().workers, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn init_twice_is_rejected() {
        let engine = FakeEngine::new();
        let cluster = cluster(&engine, options(1, 1));
        cluster.init().await.expect("init");
        assert!(matches!(
            cluster.init().await,
            Err(ClusterError::AlreadyInitialized)
        ));
        assert_eq!(engine.launches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_before_init_is_rejected() {
        let engine = FakeEngine::new();
        let cluster = cluster(&engine, options(1, 1));
        assert!(matches!(
            cluster.execute(request("<p>x</p>")).await,
            Err(ClusterError::NotReady)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_event_follows_completion() {
        let engine = FakeEngine::new();
        let cluster = cluster(&engine, options(1, 1));
        cluster.init().await.expect("init");
        let mut events = cluster.subscribe();

        cluster.execute(request("<p>x</p>")).await.expect("rendered");
        time::sleep(Duration::from_millis(10)).await;

        let seen = names(&drain(&mut events));
        let completed = seen.iter().position(|name| *name == "completed").expect("completed");
        let idle = seen.iter().rposition(|name| *name == "idle").expect("idle");
        assert_eq!(seen[0], "execute");
        assert!(idle > completed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent() {
        let engine = FakeEngine::new();
        let cluster = cluster(&engine, options(2, 2));
        cluster.init().await.expect("init");
        let mut events = cluster.subscribe();

        let report = cluster.close().await.expect("closed");
        assert_eq!(
            report,
            CloseReport {
                workers: 2,
                pending_jobs: 0
            }
        );
        assert_eq!(engine.sessions_closed(), 2);
        assert_eq!(
            lifecycle(drain(&mut events)),
            [ClusterEvent::Close {
                workers: 2,
                pending_jobs: 0
            }]
        );

        assert_eq!(cluster.close().await.expect("second close"), CloseReport::default());
        assert!(lifecycle(drain(&mut events)).is_empty());
        assert!(matches!(
            cluster.execute(request("<p>x</p>")).await,
            Err(ClusterError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_in_flight_and_rejects_queued_jobs() {
        let engine = FakeEngine::new().with_render_delay(Duration::from_secs(1));
        let cluster = cluster(&engine, options(1, 1));
        cluster.init().await.expect("init");

        let running = cluster.execute(request("<p>running</p>"));
        let queued: Vec<_> = (0..2)
            .map(|i| cluster.execute(request(&format!("<p>queued {i}</p>"))))
            .collect();
        time::sleep(Duration::from_millis(10)).await;

        let report = cluster.close().await.expect("closed");
        assert_eq!(report.pending_jobs, 2);
        assert_eq!(report.workers, 1);

        running.await.expect("in-flight job finished");
        for pending in queued {
            assert!(matches!(pending.await, Err(ClusterError::Closed)));
        }
        assert_eq!(cluster.stats().phase, ClusterPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_failure_is_reported() {
        let engine = FakeEngine::new().with_failing_session_close();
        let cluster = cluster(&engine, options(1, 1));
        cluster.init().await.expect("init");
        let mut events = cluster.subscribe();

        let err = cluster.close().await.expect_err("shutdown fault");
        assert!(matches!(err, ClusterError::Shutdown { failed: 1 }));
        assert_eq!(names(&lifecycle(drain(&mut events))), ["close", "error"]);
    }
}

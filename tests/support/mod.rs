//! Shared fixtures for the integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::sleep;
use uuid::Uuid;

use cadence::{
    CompletedExecutionInstruction, Job, JobDetail, JobExecutionContext, JobExecutionError,
    JobKey, JobListener, ListenerResult, MemoryJobStore, Scheduler, SchedulerConfig,
    SchedulerError, SchedulerListener, SimpleJobFactory, TokioWorkerPool, Trigger,
    TriggerKey, TriggerListener,
};

/// One entry per listener callback, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    JobAdded(String),
    JobScheduled(String),
    JobUnscheduled(String),
    JobDeleted(String),
    TriggerFired(String),
    TriggerComplete(String, CompletedExecutionInstruction),
    ToBeExecuted(String),
    ExecutionVetoed(String),
    WasExecuted(String, bool),
    SchedulerError(String),
    Started,
    Standby,
    ShuttingDown,
    Shutdown,
}

/// Records every listener callback it sees; registered as a job, trigger,
/// and scheduler listener at once.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    fire_instance_ids: Mutex<Vec<Uuid>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn fire_instance_ids(&self) -> Vec<Uuid> {
        self.fire_instance_ids.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }

    /// Index of the first event satisfying the predicate.
    pub fn position(&self, matches: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events().iter().position(matches)
    }

    pub fn register(self: &Arc<Self>, scheduler: &Scheduler) {
        scheduler
            .listeners()
            .add_job_listener(Arc::clone(self) as Arc<dyn JobListener>)
            .unwrap();
        scheduler
            .listeners()
            .add_trigger_listener(Arc::clone(self) as Arc<dyn TriggerListener>)
            .unwrap();
        scheduler
            .listeners()
            .add_scheduler_listener(Arc::clone(self) as Arc<dyn SchedulerListener>);
    }
}

impl JobListener for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn job_to_be_executed(&self, ctx: &Arc<JobExecutionContext>) -> ListenerResult {
        self.fire_instance_ids
            .lock()
            .unwrap()
            .push(ctx.fire_instance_id());
        self.push(Event::ToBeExecuted(ctx.job_detail().key().name.clone()));
        Ok(())
    }

    fn job_execution_vetoed(&self, ctx: &Arc<JobExecutionContext>) -> ListenerResult {
        self.push(Event::ExecutionVetoed(ctx.job_detail().key().name.clone()));
        Ok(())
    }

    fn job_was_executed(
        &self,
        ctx: &Arc<JobExecutionContext>,
        error: Option<&JobExecutionError>,
    ) -> ListenerResult {
        self.push(Event::WasExecuted(
            ctx.job_detail().key().name.clone(),
            error.is_some(),
        ));
        Ok(())
    }
}

impl TriggerListener for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn trigger_fired(&self, ctx: &Arc<JobExecutionContext>) -> ListenerResult {
        self.push(Event::TriggerFired(ctx.trigger().key().name.clone()));
        Ok(())
    }

    fn trigger_complete(
        &self,
        ctx: &Arc<JobExecutionContext>,
        instruction: CompletedExecutionInstruction,
    ) -> ListenerResult {
        self.push(Event::TriggerComplete(
            ctx.trigger().key().name.clone(),
            instruction,
        ));
        Ok(())
    }
}

impl SchedulerListener for Recorder {
    fn job_scheduled(&self, trigger: &dyn Trigger) {
        self.push(Event::JobScheduled(trigger.key().name.clone()));
    }

    fn job_unscheduled(&self, trigger_key: &TriggerKey) {
        self.push(Event::JobUnscheduled(trigger_key.name.clone()));
    }

    fn job_added(&self, detail: &JobDetail) {
        self.push(Event::JobAdded(detail.key().name.clone()));
    }

    fn job_deleted(&self, job_key: &JobKey) {
        self.push(Event::JobDeleted(job_key.name.clone()));
    }

    fn scheduler_error(&self, message: &str, _error: &SchedulerError) {
        self.push(Event::SchedulerError(message.to_string()));
    }

    fn scheduler_started(&self) {
        self.push(Event::Started);
    }

    fn scheduler_in_standby_mode(&self) {
        self.push(Event::Standby);
    }

    fn scheduler_shutting_down(&self) {
        self.push(Event::ShuttingDown);
    }

    fn scheduler_shutdown(&self) {
        self.push(Event::Shutdown);
    }
}

/// Job that counts its executions.
#[derive(Default)]
pub struct CountingJob {
    pub runs: AtomicUsize,
}

impl Job for CountingJob {
    fn execute<'a>(
        &'a self,
        _ctx: &'a JobExecutionContext,
    ) -> BoxFuture<'a, Result<Option<Value>, JobExecutionError>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
    }
}

/// Job that holds a worker for `hold` and tracks concurrency.
pub struct SlowJob {
    pub hold: Duration,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    pub completed: AtomicUsize,
}

impl SlowJob {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }
}

impl Job for SlowJob {
    fn execute<'a>(
        &'a self,
        _ctx: &'a JobExecutionContext,
    ) -> BoxFuture<'a, Result<Option<Value>, JobExecutionError>> {
        Box::pin(async move {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(self.hold).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
    }
}

/// Interruptible job that blocks until interrupted or `block_for` passes.
pub struct BlockingJob {
    pub block_for: Duration,
    pub started: Notify,
    pub is_running: AtomicBool,
    pub interrupted: AtomicBool,
    release: Notify,
}

impl BlockingJob {
    pub fn new(block_for: Duration) -> Self {
        Self {
            block_for,
            started: Notify::new(),
            is_running: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            release: Notify::new(),
        }
    }
}

impl Job for BlockingJob {
    fn execute<'a>(
        &'a self,
        _ctx: &'a JobExecutionContext,
    ) -> BoxFuture<'a, Result<Option<Value>, JobExecutionError>> {
        Box::pin(async move {
            self.is_running.store(true, Ordering::SeqCst);
            self.started.notify_waiters();
            tokio::select! {
                _ = sleep(self.block_for) => {}
                _ = self.release.notified() => {}
            }
            self.is_running.store(false, Ordering::SeqCst);
            Ok(None)
        })
    }

    fn is_interruptible(&self) -> bool {
        true
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.release.notify_waiters();
    }
}

/// A scheduler over a fresh memory store and worker pool, with a recorder
/// already registered.
pub struct TestScheduler {
    pub scheduler: Scheduler,
    pub store: Arc<MemoryJobStore>,
    pub factory: Arc<SimpleJobFactory>,
    pub recorder: Arc<Recorder>,
}

pub fn test_scheduler(name: &str, pool_size: usize, config: SchedulerConfig) -> TestScheduler {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryJobStore::with_misfire_threshold(Duration::from_millis(
        200,
    )));
    let factory = Arc::new(SimpleJobFactory::new());
    let scheduler = Scheduler::new(
        name,
        config,
        Arc::clone(&store) as _,
        Arc::new(TokioWorkerPool::new(pool_size)) as _,
        Arc::clone(&factory) as _,
    )
    .expect("scheduler construction failed");
    let recorder = Recorder::new();
    recorder.register(&scheduler);
    TestScheduler {
        scheduler,
        store,
        factory,
        recorder,
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

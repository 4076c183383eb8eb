//! The scheduler facade: the full operational surface plus lifecycle.
//!
//! A [`Scheduler`] is a cheap clone handle over shared internals. Every
//! operation validates lifecycle state first, mutates the store, signals
//! the loop, and emits listener events, in that order.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::calendar::Calendar;
use crate::config::SchedulerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{SchedulerError, SchedulerResult};
use crate::execution::{ExecutionTracker, JobExecutionContext};
use crate::job::{JobDataMap, JobDetail, JobFactory, JobKey};
use crate::listener::{ListenerRegistry, LoggingErrorListener};
use crate::repository::SchedulerRepository;
use crate::scheduling_loop::{LoopState, SchedulingLoop};
use crate::signaler::Signaler;
use crate::store::{JobStore, StoreError};
use crate::trigger::{MANUAL_TRIGGER_GROUP, SimpleTrigger, Trigger, TriggerKey, TriggerState};
use crate::worker_pool::WorkerPool;

/// Bound on fresh-id retries when a manual trigger id collides.
const MANUAL_TRIGGER_ID_ATTEMPTS: usize = 100;

#[derive(Default)]
struct LifecycleState {
    initial_start: Option<DateTime<Utc>>,
    standby: bool,
    shutting_down: bool,
    closed: bool,
}

/// Snapshot of a scheduler's identity and counters.
#[derive(Debug, Clone)]
pub struct SchedulerMetadata {
    pub scheduler_name: String,
    pub started: bool,
    pub in_standby_mode: bool,
    pub shutdown: bool,
    pub running_since: Option<DateTime<Utc>>,
    pub num_jobs_executed: u64,
    pub currently_executing_jobs: usize,
    pub supports_persistence: bool,
    pub clustered: bool,
}

struct SchedulerInner {
    name: String,
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    pool: Arc<dyn WorkerPool>,
    listeners: Arc<ListenerRegistry>,
    tracker: Arc<ExecutionTracker>,
    signaler: Arc<Signaler>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Mutex<LifecycleState>,
    loop_ctrl: watch::Sender<LoopState>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    hold_list: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
    manual_rng: Mutex<Box<dyn RngCore + Send>>,
}

/// Handle to one named scheduler instance.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Wire a scheduler from its collaborators and register it in the
    /// process-wide repository. The scheduling loop task starts
    /// immediately, paused; call [`Scheduler::start`] to begin firing.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        name: impl Into<String>,
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        pool: Arc<dyn WorkerPool>,
        job_factory: Arc<dyn JobFactory>,
    ) -> SchedulerResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "scheduler name must not be empty".into(),
            ));
        }

        let listeners = Arc::new(ListenerRegistry::new());
        let tracker = Arc::new(ExecutionTracker::new());
        let signaler = Arc::new(Signaler::new());
        listeners.add_internal_job_listener(Arc::clone(&tracker) as _)?;
        listeners.add_internal_scheduler_listener(Arc::new(LoggingErrorListener));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            Arc::clone(&listeners),
            Arc::clone(&tracker),
            Arc::clone(&signaler),
            job_factory,
            config.signal_on_scheduling_change,
        ));

        let (loop_ctrl, loop_state) = watch::channel(LoopState::Paused);
        let inner = Arc::new(SchedulerInner {
            name,
            store,
            pool,
            listeners,
            tracker,
            signaler,
            dispatcher,
            lifecycle: Mutex::new(LifecycleState::default()),
            loop_ctrl,
            loop_handle: Mutex::new(None),
            hold_list: Mutex::new(Vec::new()),
            manual_rng: Mutex::new(Box::new(StdRng::from_entropy())),
            config,
        });
        let scheduler = Self { inner };

        // Register before spawning so a duplicate name leaves no task
        // behind.
        SchedulerRepository::bind(scheduler.clone())?;

        let handle = SchedulingLoop::spawn(
            Arc::clone(&scheduler.inner.store),
            Arc::clone(&scheduler.inner.pool),
            Arc::clone(&scheduler.inner.dispatcher),
            Arc::clone(&scheduler.inner.signaler),
            Arc::clone(&scheduler.inner.listeners),
            scheduler.inner.config.clone(),
            loop_state,
        );
        *scheduler
            .inner
            .loop_handle
            .lock()
            .expect("loop handle poisoned") = Some(handle);

        info!(scheduler = %scheduler.inner.name, "scheduler created");
        Ok(scheduler)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    /// Replace the RNG used for manual trigger ids. Deterministic ids make
    /// collision behaviour reproducible.
    pub fn set_manual_trigger_rng(&self, rng: Box<dyn RngCore + Send>) {
        *self.inner.manual_rng.lock().expect("manual rng poisoned") = rng;
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.inner.lifecycle.lock().expect("lifecycle state poisoned")
    }

    fn validate_state(&self) -> SchedulerResult<()> {
        let lifecycle = self.lifecycle();
        if lifecycle.shutting_down || lifecycle.closed {
            return Err(SchedulerError::Shutdown);
        }
        Ok(())
    }

    fn signal(&self, candidate: Option<DateTime<Utc>>) {
        if self.inner.config.signal_on_scheduling_change {
            self.inner.signaler.signal_scheduling_change(candidate);
        }
    }

    async fn resolve_calendar(
        &self,
        trigger: &dyn Trigger,
    ) -> SchedulerResult<Option<Box<dyn Calendar>>> {
        match trigger.calendar_name() {
            Some(name) => {
                let calendar = self
                    .inner
                    .store
                    .retrieve_calendar(name)
                    .await?
                    .ok_or_else(|| SchedulerError::CalendarNotFound(name.to_string()))?;
                Ok(Some(calendar))
            }
            None => Ok(None),
        }
    }

    /// Store a job together with its trigger and return the first fire
    /// time.
    pub async fn schedule_job(
        &self,
        detail: JobDetail,
        mut trigger: Box<dyn Trigger>,
    ) -> SchedulerResult<DateTime<Utc>> {
        self.validate_state()?;
        detail.validate()?;
        trigger.validate()?;

        match trigger.job_key() {
            None => trigger.set_job_key(detail.key().clone()),
            Some(bound) if bound == detail.key() => {}
            Some(bound) => {
                return Err(SchedulerError::InvalidTriggerBinding {
                    trigger: trigger.key().clone(),
                    expected: detail.key().clone(),
                    actual: bound.clone(),
                });
            }
        }

        let calendar = self.resolve_calendar(trigger.as_ref()).await?;
        let first_fire = trigger
            .compute_first_fire_time(calendar.as_deref())
            .ok_or_else(|| SchedulerError::NeverFires(trigger.key().clone()))?;

        self.inner
            .store
            .store_job_and_trigger(&detail, trigger.as_ref())
            .await?;
        self.signal(Some(first_fire));
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.job_added(&detail));
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.job_scheduled(trigger.as_ref()));
        Ok(first_fire)
    }

    /// Schedule a trigger against an already-stored job.
    pub async fn schedule_trigger(
        &self,
        mut trigger: Box<dyn Trigger>,
    ) -> SchedulerResult<DateTime<Utc>> {
        self.validate_state()?;
        trigger.validate()?;
        let job_key = trigger
            .job_key()
            .cloned()
            .ok_or_else(|| {
                SchedulerError::InvalidArgument(format!(
                    "trigger {} is not bound to a job",
                    trigger.key()
                ))
            })?;
        if self.inner.store.retrieve_job(&job_key).await?.is_none() {
            return Err(SchedulerError::InvalidArgument(format!(
                "trigger {} references unknown job {job_key}",
                trigger.key()
            )));
        }

        let calendar = self.resolve_calendar(trigger.as_ref()).await?;
        let first_fire = trigger
            .compute_first_fire_time(calendar.as_deref())
            .ok_or_else(|| SchedulerError::NeverFires(trigger.key().clone()))?;

        self.inner.store.store_trigger(trigger.as_ref(), false).await?;
        self.signal(Some(first_fire));
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.job_scheduled(trigger.as_ref()));
        Ok(first_fire)
    }

    /// Store a job without a trigger. A non-durable job can only be stored
    /// this way when replacing an existing one.
    pub async fn add_job(&self, detail: JobDetail, replace: bool) -> SchedulerResult<()> {
        self.validate_state()?;
        detail.validate()?;
        if !detail.is_durable() && !replace {
            return Err(SchedulerError::NonDurableWithoutTrigger(detail.key().clone()));
        }
        self.inner.store.store_job(&detail, replace).await?;
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.job_added(&detail));
        Ok(())
    }

    /// Remove a job and all of its triggers. Returns true if anything was
    /// removed.
    pub async fn delete_job(&self, name: &str, group: Option<&str>) -> SchedulerResult<bool> {
        self.validate_state()?;
        let key = JobKey::new(name, group);
        let triggers = self.inner.store.get_triggers_for_job(&key).await?;

        let mut removed = false;
        for trigger in &triggers {
            let unscheduled = self
                .inner
                .store
                .remove_trigger(trigger.key())
                .await
                .map_err(|source| SchedulerError::DeleteConflict {
                    job: key.clone(),
                    source,
                })?;
            if unscheduled {
                removed = true;
                let trigger_key = trigger.key().clone();
                self.inner
                    .listeners
                    .notify_scheduler_listeners(|l| l.job_unscheduled(&trigger_key));
            }
        }

        if self.inner.store.remove_job(&key).await? {
            removed = true;
            self.inner
                .listeners
                .notify_scheduler_listeners(|l| l.job_deleted(&key));
        }
        self.signal(None);
        Ok(removed)
    }

    /// Remove one trigger. Returns false if it was not found.
    pub async fn unschedule_job(&self, name: &str, group: Option<&str>) -> SchedulerResult<bool> {
        self.validate_state()?;
        let key = TriggerKey::new(name, group);
        if !self.inner.store.remove_trigger(&key).await? {
            return Ok(false);
        }
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.job_unscheduled(&key));
        Ok(true)
    }

    /// Replace a trigger, keeping the job binding. Returns `None` if the
    /// old trigger was absent, otherwise the new first fire time.
    pub async fn reschedule_job(
        &self,
        name: &str,
        group: Option<&str>,
        mut new_trigger: Box<dyn Trigger>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        self.validate_state()?;
        new_trigger.validate()?;
        let key = TriggerKey::new(name, group);

        let Some(old_trigger) = self.inner.store.retrieve_trigger(&key).await? else {
            return Ok(None);
        };
        if new_trigger.job_key().is_none() {
            if let Some(job_key) = old_trigger.job_key() {
                new_trigger.set_job_key(job_key.clone());
            }
        }

        let calendar = self.resolve_calendar(new_trigger.as_ref()).await?;
        let first_fire = new_trigger
            .compute_first_fire_time(calendar.as_deref())
            .ok_or_else(|| SchedulerError::NeverFires(new_trigger.key().clone()))?;

        if !self
            .inner
            .store
            .replace_trigger(&key, new_trigger.as_ref())
            .await?
        {
            return Ok(None);
        }
        self.signal(Some(first_fire));
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.job_unscheduled(&key));
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.job_scheduled(new_trigger.as_ref()));
        Ok(Some(first_fire))
    }

    /// Fire the named job once, now, via a generated one-shot trigger in
    /// the reserved manual group. Returns the generated trigger key.
    pub async fn trigger_job(
        &self,
        name: &str,
        group: Option<&str>,
        data: Option<JobDataMap>,
        volatile: bool,
    ) -> SchedulerResult<TriggerKey> {
        self.validate_state()?;
        let job_key = JobKey::new(name, group);
        if self.inner.store.retrieve_job(&job_key).await?.is_none() {
            return Err(SchedulerError::InvalidArgument(format!(
                "job {job_key} not found"
            )));
        }

        let mut last_collision = StoreError::ObjectAlreadyExists("manual trigger".into());
        for _ in 0..MANUAL_TRIGGER_ID_ATTEMPTS {
            let id = {
                let mut rng = self.inner.manual_rng.lock().expect("manual rng poisoned");
                rng.next_u64() >> 1
            };
            let now = Utc::now();
            let mut trigger =
                SimpleTrigger::new(TriggerKey::new(format!("MT_{id}"), Some(MANUAL_TRIGGER_GROUP)), now)
                    .with_job_key(job_key.clone())
                    .with_volatility(volatile);
            if let Some(data) = &data {
                for (k, v) in data {
                    trigger = trigger.with_data(k.clone(), v.clone());
                }
            }
            trigger.compute_first_fire_time(None);

            match self.inner.store.store_trigger(&trigger, false).await {
                Ok(()) => {
                    self.signal(Some(now));
                    return Ok(trigger.key().clone());
                }
                Err(StoreError::ObjectAlreadyExists(what)) => {
                    last_collision = StoreError::ObjectAlreadyExists(what);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(last_collision.into())
    }

    pub async fn pause_trigger(&self, name: &str, group: Option<&str>) -> SchedulerResult<()> {
        self.validate_state()?;
        let key = TriggerKey::new(name, group);
        self.inner.store.pause_trigger(&key).await?;
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.triggers_paused(Some(&key.name), &key.group));
        Ok(())
    }

    pub async fn pause_trigger_group(&self, group: &str) -> SchedulerResult<()> {
        self.validate_state()?;
        self.inner.store.pause_trigger_group(group).await?;
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.triggers_paused(None, group));
        Ok(())
    }

    pub async fn pause_job(&self, name: &str, group: Option<&str>) -> SchedulerResult<()> {
        self.validate_state()?;
        let key = JobKey::new(name, group);
        self.inner.store.pause_job(&key).await?;
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.jobs_paused(Some(&key.name), &key.group));
        Ok(())
    }

    pub async fn pause_job_group(&self, group: &str) -> SchedulerResult<()> {
        self.validate_state()?;
        self.inner.store.pause_job_group(group).await?;
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.jobs_paused(None, group));
        Ok(())
    }

    pub async fn resume_trigger(&self, name: &str, group: Option<&str>) -> SchedulerResult<()> {
        self.validate_state()?;
        let key = TriggerKey::new(name, group);
        self.inner.store.resume_trigger(&key).await?;
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.triggers_resumed(Some(&key.name), &key.group));
        Ok(())
    }

    pub async fn resume_trigger_group(&self, group: &str) -> SchedulerResult<()> {
        self.validate_state()?;
        self.inner.store.resume_trigger_group(group).await?;
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.triggers_resumed(None, group));
        Ok(())
    }

    pub async fn resume_job(&self, name: &str, group: Option<&str>) -> SchedulerResult<()> {
        self.validate_state()?;
        let key = JobKey::new(name, group);
        self.inner.store.resume_job(&key).await?;
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.jobs_resumed(Some(&key.name), &key.group));
        Ok(())
    }

    pub async fn resume_job_group(&self, group: &str) -> SchedulerResult<()> {
        self.validate_state()?;
        self.inner.store.resume_job_group(group).await?;
        self.signal(None);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.jobs_resumed(None, group));
        Ok(())
    }

    pub async fn pause_all(&self) -> SchedulerResult<()> {
        self.validate_state()?;
        self.inner.store.pause_all().await?;
        self.signal(None);
        Ok(())
    }

    pub async fn resume_all(&self) -> SchedulerResult<()> {
        self.validate_state()?;
        self.inner.store.resume_all().await?;
        self.signal(None);
        Ok(())
    }

    pub async fn get_job_detail(
        &self,
        name: &str,
        group: Option<&str>,
    ) -> SchedulerResult<Option<JobDetail>> {
        self.validate_state()?;
        Ok(self.inner.store.retrieve_job(&JobKey::new(name, group)).await?)
    }

    pub async fn get_trigger(
        &self,
        name: &str,
        group: Option<&str>,
    ) -> SchedulerResult<Option<Box<dyn Trigger>>> {
        self.validate_state()?;
        Ok(self
            .inner
            .store
            .retrieve_trigger(&TriggerKey::new(name, group))
            .await?)
    }

    pub async fn get_trigger_state(
        &self,
        name: &str,
        group: Option<&str>,
    ) -> SchedulerResult<TriggerState> {
        self.validate_state()?;
        Ok(self
            .inner
            .store
            .get_trigger_state(&TriggerKey::new(name, group))
            .await?)
    }

    pub async fn get_triggers_of_job(
        &self,
        name: &str,
        group: Option<&str>,
    ) -> SchedulerResult<Vec<Box<dyn Trigger>>> {
        self.validate_state()?;
        Ok(self
            .inner
            .store
            .get_triggers_for_job(&JobKey::new(name, group))
            .await?)
    }

    pub async fn get_job_keys(&self, group: &str) -> SchedulerResult<Vec<JobKey>> {
        self.validate_state()?;
        Ok(self.inner.store.get_job_keys(group).await?)
    }

    pub async fn get_trigger_keys(&self, group: &str) -> SchedulerResult<Vec<TriggerKey>> {
        self.validate_state()?;
        Ok(self.inner.store.get_trigger_keys(group).await?)
    }

    pub async fn get_job_group_names(&self) -> SchedulerResult<Vec<String>> {
        self.validate_state()?;
        Ok(self.inner.store.get_job_group_names().await?)
    }

    pub async fn get_trigger_group_names(&self) -> SchedulerResult<Vec<String>> {
        self.validate_state()?;
        Ok(self.inner.store.get_trigger_group_names().await?)
    }

    pub async fn get_paused_trigger_groups(
        &self,
    ) -> SchedulerResult<std::collections::HashSet<String>> {
        self.validate_state()?;
        Ok(self.inner.store.get_paused_trigger_groups().await?)
    }

    pub async fn is_trigger_group_paused(&self, group: &str) -> SchedulerResult<bool> {
        self.validate_state()?;
        Ok(self.inner.store.is_trigger_group_paused(group).await?)
    }

    pub async fn is_job_group_paused(&self, group: &str) -> SchedulerResult<bool> {
        self.validate_state()?;
        Ok(self.inner.store.is_job_group_paused(group).await?)
    }

    pub async fn add_calendar(
        &self,
        name: &str,
        calendar: Box<dyn Calendar>,
        replace: bool,
    ) -> SchedulerResult<()> {
        self.validate_state()?;
        if name.is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "calendar name must not be empty".into(),
            ));
        }
        self.inner
            .store
            .store_calendar(name, calendar.as_ref(), replace)
            .await?;
        Ok(())
    }

    pub async fn delete_calendar(&self, name: &str) -> SchedulerResult<bool> {
        self.validate_state()?;
        Ok(self.inner.store.remove_calendar(name).await?)
    }

    pub async fn get_calendar(&self, name: &str) -> SchedulerResult<Option<Box<dyn Calendar>>> {
        self.validate_state()?;
        Ok(self.inner.store.retrieve_calendar(name).await?)
    }

    /// Snapshot of the executions currently in flight.
    pub fn currently_executing_jobs(&self) -> Vec<Arc<JobExecutionContext>> {
        self.inner.tracker.snapshot()
    }

    /// Interrupt every executing instance of the named job. Fails with
    /// [`SchedulerError::JobNotInterruptible`] when a match was found that
    /// does not support interruption; returns whether at least one was
    /// interrupted.
    pub fn interrupt(&self, name: &str, group: Option<&str>) -> SchedulerResult<bool> {
        self.validate_state()?;
        let key = JobKey::new(name, group);
        let mut interrupted = false;
        for ctx in self.inner.tracker.snapshot() {
            if ctx.job_detail().key() != &key {
                continue;
            }
            if !ctx.job_instance().is_interruptible() {
                return Err(SchedulerError::JobNotInterruptible(key));
            }
            ctx.job_instance().interrupt();
            interrupted = true;
        }
        Ok(interrupted)
    }

    /// Keep an opaque value alive for the scheduler's lifetime. Duplicate
    /// inserts are allowed.
    pub fn add_no_gc_object(&self, object: Arc<dyn Any + Send + Sync>) {
        self.inner
            .hold_list
            .lock()
            .expect("hold list poisoned")
            .push(object);
    }

    /// Drop the first held entry that is the same allocation as `object`.
    pub fn remove_no_gc_object(&self, object: &Arc<dyn Any + Send + Sync>) -> bool {
        let mut held = self.inner.hold_list.lock().expect("hold list poisoned");
        match held.iter().position(|o| Arc::ptr_eq(o, object)) {
            Some(idx) => {
                held.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn metadata(&self) -> SchedulerMetadata {
        let lifecycle = self.lifecycle();
        SchedulerMetadata {
            scheduler_name: self.inner.name.clone(),
            started: !lifecycle.shutting_down
                && !lifecycle.closed
                && !lifecycle.standby
                && lifecycle.initial_start.is_some(),
            in_standby_mode: lifecycle.standby,
            shutdown: lifecycle.closed,
            running_since: lifecycle.initial_start,
            num_jobs_executed: self.inner.tracker.num_jobs_fired(),
            currently_executing_jobs: self.inner.tracker.count(),
            supports_persistence: self.inner.store.supports_persistence(),
            clustered: self.inner.store.clustered(),
        }
    }

    pub fn is_started(&self) -> bool {
        let lifecycle = self.lifecycle();
        !lifecycle.shutting_down
            && !lifecycle.closed
            && !lifecycle.standby
            && lifecycle.initial_start.is_some()
    }

    pub fn in_standby_mode(&self) -> bool {
        self.lifecycle().standby
    }

    pub fn is_shutdown(&self) -> bool {
        let lifecycle = self.lifecycle();
        lifecycle.shutting_down || lifecycle.closed
    }

    /// Start (or resume from standby) firing triggers.
    pub async fn start(&self) -> SchedulerResult<()> {
        let first_start = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.shutting_down || lifecycle.closed {
                return Err(SchedulerError::Shutdown);
            }
            let first = lifecycle.initial_start.is_none();
            if first {
                lifecycle.initial_start = Some(Utc::now());
            }
            lifecycle.standby = false;
            first
        };
        if first_start {
            self.inner.store.scheduler_started().await?;
        }
        let _ = self.inner.loop_ctrl.send(LoopState::Running);
        info!(scheduler = %self.inner.name, "scheduler started");
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.scheduler_started());
        Ok(())
    }

    /// Start after `delay`, without blocking the caller.
    pub fn start_delayed(&self, delay: Duration) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(err) = scheduler.start().await {
                warn!(scheduler = %scheduler.inner.name, error = %err, "delayed start failed");
            }
        });
    }

    /// Stop firing but keep everything else alive; `start` resumes.
    pub fn standby(&self) -> SchedulerResult<()> {
        self.validate_state()?;
        self.lifecycle().standby = true;
        let _ = self.inner.loop_ctrl.send(LoopState::Paused);
        info!(scheduler = %self.inner.name, "scheduler in standby mode");
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.scheduler_in_standby_mode());
        Ok(())
    }

    /// Shut down. Idempotent: calls after the first are no-ops. With
    /// `wait_for_jobs_to_complete`, blocks until the executing set drains.
    pub async fn shutdown(&self, wait_for_jobs_to_complete: bool) -> SchedulerResult<()> {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.shutting_down || lifecycle.closed {
                return Ok(());
            }
            lifecycle.shutting_down = true;
            lifecycle.standby = true;
        }
        info!(scheduler = %self.inner.name, "scheduler shutting down");
        let _ = self.inner.loop_ctrl.send(LoopState::Halted);
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.scheduler_shutting_down());

        if self.inner.config.interrupt_jobs_on_shutdown
            || (wait_for_jobs_to_complete && self.inner.config.interrupt_jobs_on_shutdown_with_wait)
        {
            for ctx in self.inner.tracker.snapshot() {
                if ctx.job_instance().is_interruptible() {
                    ctx.job_instance().interrupt();
                }
            }
        }

        self.inner.pool.shutdown(wait_for_jobs_to_complete).await;
        if wait_for_jobs_to_complete {
            // The pool has drained its workers; wait for the last
            // completions to reach the store and the tracker.
            while self.inner.tracker.count() > 0 {
                sleep(Duration::from_millis(5)).await;
            }
        }

        let handle = self
            .inner
            .loop_handle
            .lock()
            .expect("loop handle poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.lifecycle().closed = true;
        if let Err(err) = self.inner.store.shutdown().await {
            warn!(scheduler = %self.inner.name, error = %err, "job store shutdown failed");
        }
        self.inner
            .listeners
            .notify_scheduler_listeners(|l| l.scheduler_shutdown());
        self.inner
            .hold_list
            .lock()
            .expect("hold list poisoned")
            .clear();
        SchedulerRepository::remove(&self.inner.name);
        info!(scheduler = %self.inner.name, "scheduler shut down");
        Ok(())
    }
}

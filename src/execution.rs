//! Per-fire execution context and the live-execution tracker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::job::{Job, JobDataMap, JobDetail, JobExecutionError};
use crate::listener::{JobListener, ListenerResult};
use crate::store::TriggerFiredBundle;
use crate::trigger::Trigger;

/// Everything one invocation of a job can see: the detail and trigger
/// snapshots, the fire times, the merged data map, and a result slot.
///
/// Contexts are shared (`Arc`) between the dispatcher, listeners, and the
/// tracker; the result slot is interior-mutable for that reason.
pub struct JobExecutionContext {
    fire_instance_id: Uuid,
    job_detail: JobDetail,
    trigger: Box<dyn Trigger>,
    job_instance: Arc<dyn Job>,
    merged_data: JobDataMap,
    scheduled_fire_time: Option<DateTime<Utc>>,
    fire_time: DateTime<Utc>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    recovering: bool,
    refire_count: AtomicUsize,
    result: Mutex<Option<Value>>,
}

impl JobExecutionContext {
    pub(crate) fn new(bundle: TriggerFiredBundle, job_instance: Arc<dyn Job>) -> Self {
        // Trigger data overlays job data on key collisions.
        let mut merged_data = bundle.job_detail.job_data().clone();
        for (k, v) in bundle.trigger.job_data() {
            merged_data.insert(k.clone(), v.clone());
        }
        Self {
            fire_instance_id: Uuid::new_v4(),
            merged_data,
            scheduled_fire_time: bundle.scheduled_fire_time,
            fire_time: bundle.fire_time,
            previous_fire_time: bundle.previous_fire_time,
            next_fire_time: bundle.next_fire_time,
            recovering: bundle.recovering,
            job_detail: bundle.job_detail,
            trigger: bundle.trigger,
            job_instance,
            refire_count: AtomicUsize::new(0),
            result: Mutex::new(None),
        }
    }

    /// Unique across the scheduler's lifetime.
    pub fn fire_instance_id(&self) -> Uuid {
        self.fire_instance_id
    }

    pub fn job_detail(&self) -> &JobDetail {
        &self.job_detail
    }

    pub fn trigger(&self) -> &dyn Trigger {
        self.trigger.as_ref()
    }

    pub fn job_instance(&self) -> &Arc<dyn Job> {
        &self.job_instance
    }

    /// Job data with the trigger's overlay applied.
    pub fn merged_job_data(&self) -> &JobDataMap {
        &self.merged_data
    }

    /// The nominal fire time the trigger prescribed.
    pub fn scheduled_fire_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_fire_time
    }

    /// The wall-clock time the fire actually happened.
    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    /// How many times this fire has been immediately re-executed.
    pub fn refire_count(&self) -> usize {
        self.refire_count.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_refire_count(&self) {
        self.refire_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn result(&self) -> Option<Value> {
        self.result.lock().expect("result slot poisoned").clone()
    }

    pub fn set_result(&self, value: Option<Value>) {
        *self.result.lock().expect("result slot poisoned") = value;
    }
}

/// Live set of currently executing jobs plus the fired counter.
///
/// Installed as an internal job listener at scheduler construction; entries
/// are inserted by `job_to_be_executed` and removed by the dispatcher once
/// the store has acknowledged completion, so a drained tracker means no
/// further events are pending.
#[derive(Default)]
pub struct ExecutionTracker {
    executing: Mutex<HashMap<Uuid, Arc<JobExecutionContext>>>,
    num_jobs_fired: AtomicU64,
}

impl ExecutionTracker {
    pub(crate) const LISTENER_NAME: &'static str = "execution-tracker";

    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, ctx: Arc<JobExecutionContext>) {
        self.num_jobs_fired.fetch_add(1, Ordering::Relaxed);
        self.executing
            .lock()
            .expect("executing map poisoned")
            .insert(ctx.fire_instance_id(), ctx);
    }

    pub(crate) fn remove(&self, fire_instance_id: Uuid) {
        self.executing
            .lock()
            .expect("executing map poisoned")
            .remove(&fire_instance_id);
    }

    /// Read-only snapshot of the executions in flight.
    pub fn snapshot(&self) -> Vec<Arc<JobExecutionContext>> {
        self.executing
            .lock()
            .expect("executing map poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.executing.lock().expect("executing map poisoned").len()
    }

    pub fn num_jobs_fired(&self) -> u64 {
        self.num_jobs_fired.load(Ordering::Relaxed)
    }
}

impl JobListener for ExecutionTracker {
    fn name(&self) -> &str {
        Self::LISTENER_NAME
    }

    fn job_to_be_executed(&self, ctx: &Arc<JobExecutionContext>) -> ListenerResult {
        self.insert(Arc::clone(ctx));
        Ok(())
    }

    fn job_execution_vetoed(&self, _ctx: &Arc<JobExecutionContext>) -> ListenerResult {
        Ok(())
    }

    fn job_was_executed(
        &self,
        _ctx: &Arc<JobExecutionContext>,
        _error: Option<&JobExecutionError>,
    ) -> ListenerResult {
        // Removal is deferred to the dispatcher so the executing count only
        // drops once the store has acknowledged the completion.
        Ok(())
    }
}

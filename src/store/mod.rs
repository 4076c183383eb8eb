//! Durable-store seam: jobs, triggers, calendars, acquisition of due
//! triggers, and pause state all live behind [`JobStore`].
//!
//! The scheduler treats every store call as a serialisation point and
//! never holds a store transaction across user code. Trigger state
//! transitions (NORMAL, PAUSED, COMPLETE, ERROR, BLOCKED, ACQUIRED) are
//! owned solely by the store.

mod memory;

pub use memory::MemoryJobStore;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::calendar::Calendar;
use crate::job::{JobDetail, JobKey};
use crate::trigger::{CompletedExecutionInstruction, Trigger, TriggerKey, TriggerState};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    ObjectAlreadyExists(String),

    /// Recoverable failure; the scheduling loop backs off and retries.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Unrecoverable failure; escalated to scheduler listeners and the
    /// loop halts.
    #[error("fatal store failure: {0}")]
    Fatal(String),

    #[error("{0}")]
    Message(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Everything the dispatcher needs about one fired trigger: the resolved
/// job, the calendar, the relevant times, and the already-advanced trigger
/// state.
pub struct TriggerFiredBundle {
    pub job_detail: JobDetail,
    pub trigger: Box<dyn Trigger>,
    pub calendar: Option<Box<dyn Calendar>>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub fire_time: DateTime<Utc>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub recovering: bool,
}

/// Per-trigger outcome of `triggers_fired`.
pub enum FiredTriggerOutcome {
    /// The trigger fired; hand the bundle to the dispatcher.
    Fired(Box<TriggerFiredBundle>),
    /// The trigger vanished or became paused between acquisition and
    /// firing; nothing to do.
    NoFire,
    /// Firing this one trigger failed; the rest of the batch stands.
    Error(StoreError),
}

/// Contract for the durable set of jobs, triggers, and calendars.
///
/// Methods are object-safe async via [`BoxFuture`], so stores can be
/// shared as `Arc<dyn JobStore>` across the facade, loop, and dispatcher.
pub trait JobStore: Send + Sync {
    /// Store a job. With `replace = false`, a duplicate key fails with
    /// [`StoreError::ObjectAlreadyExists`].
    fn store_job<'a>(&'a self, detail: &'a JobDetail, replace: bool)
    -> BoxFuture<'a, StoreResult<()>>;

    /// Store a trigger. The referenced job must already exist. Initial
    /// state honours pause state: a trigger stored into a paused group
    /// starts out PAUSED, and a stateful job mid-execution yields BLOCKED.
    fn store_trigger<'a>(
        &'a self,
        trigger: &'a dyn Trigger,
        replace: bool,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Store both atomically.
    fn store_job_and_trigger<'a>(
        &'a self,
        detail: &'a JobDetail,
        trigger: &'a dyn Trigger,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Remove a job and all of its triggers. Returns false when absent.
    fn remove_job<'a>(&'a self, key: &'a JobKey) -> BoxFuture<'a, StoreResult<bool>>;

    /// Remove a trigger. A non-durable job left with no triggers is
    /// removed along with it. Returns false when absent.
    fn remove_trigger<'a>(&'a self, key: &'a TriggerKey) -> BoxFuture<'a, StoreResult<bool>>;

    /// Atomically replace the trigger under `key` with `new_trigger`,
    /// which must reference the same job. Returns false when absent.
    fn replace_trigger<'a>(
        &'a self,
        key: &'a TriggerKey,
        new_trigger: &'a dyn Trigger,
    ) -> BoxFuture<'a, StoreResult<bool>>;

    fn retrieve_job<'a>(&'a self, key: &'a JobKey)
    -> BoxFuture<'a, StoreResult<Option<JobDetail>>>;

    fn retrieve_trigger<'a>(
        &'a self,
        key: &'a TriggerKey,
    ) -> BoxFuture<'a, StoreResult<Option<Box<dyn Trigger>>>>;

    fn store_calendar<'a>(
        &'a self,
        name: &'a str,
        calendar: &'a dyn Calendar,
        replace: bool,
    ) -> BoxFuture<'a, StoreResult<()>>;

    fn remove_calendar<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<bool>>;

    fn retrieve_calendar<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Box<dyn Calendar>>>>;

    fn get_triggers_for_job<'a>(
        &'a self,
        key: &'a JobKey,
    ) -> BoxFuture<'a, StoreResult<Vec<Box<dyn Trigger>>>>;

    fn get_trigger_state<'a>(
        &'a self,
        key: &'a TriggerKey,
    ) -> BoxFuture<'a, StoreResult<TriggerState>>;

    fn get_job_keys<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<Vec<JobKey>>>;

    fn get_trigger_keys<'a>(&'a self, group: &'a str)
    -> BoxFuture<'a, StoreResult<Vec<TriggerKey>>>;

    fn get_job_group_names<'a>(&'a self) -> BoxFuture<'a, StoreResult<Vec<String>>>;

    fn get_trigger_group_names<'a>(&'a self) -> BoxFuture<'a, StoreResult<Vec<String>>>;

    fn pause_trigger<'a>(&'a self, key: &'a TriggerKey) -> BoxFuture<'a, StoreResult<()>>;

    /// Pause every trigger in the group, and remember the group so that
    /// triggers stored into it later start out paused.
    fn pause_trigger_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    fn pause_job<'a>(&'a self, key: &'a JobKey) -> BoxFuture<'a, StoreResult<()>>;

    fn pause_job_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    /// Resume a trigger, applying its misfire policy if it fell behind
    /// while paused.
    fn resume_trigger<'a>(&'a self, key: &'a TriggerKey) -> BoxFuture<'a, StoreResult<()>>;

    fn resume_trigger_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    fn resume_job<'a>(&'a self, key: &'a JobKey) -> BoxFuture<'a, StoreResult<()>>;

    fn resume_job_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    fn pause_all<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>>;

    fn resume_all<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>>;

    fn get_paused_trigger_groups<'a>(&'a self) -> BoxFuture<'a, StoreResult<HashSet<String>>>;

    fn is_trigger_group_paused<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<bool>>;

    fn is_job_group_paused<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<bool>>;

    /// Atomically acquire up to `max_count` triggers with a next fire time
    /// no later than `no_later_than + time_window`, moving them to
    /// ACQUIRED. Misfire policies are applied here: a trigger whose fire
    /// time elapsed past the store's threshold has its policy applied
    /// before it is considered. Results are ordered by
    /// (next fire time, priority descending, key).
    fn acquire_next_triggers<'a>(
        &'a self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: chrono::Duration,
    ) -> BoxFuture<'a, StoreResult<Vec<Box<dyn Trigger>>>>;

    /// Return an acquired trigger to NORMAL without firing it.
    fn release_acquired_trigger<'a>(
        &'a self,
        trigger: &'a dyn Trigger,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Fire a batch of acquired triggers: advance each trigger's state,
    /// resolve its job and calendar, and block concurrent executions of
    /// stateful jobs. Outcomes are returned in batch order.
    fn triggers_fired<'a>(
        &'a self,
        triggers: &'a [Box<dyn Trigger>],
    ) -> BoxFuture<'a, StoreResult<Vec<FiredTriggerOutcome>>>;

    /// Record completion of an execution: persist updated trigger state
    /// per the instruction and release the concurrency lock of a stateful
    /// job.
    fn triggered_job_complete<'a>(
        &'a self,
        trigger: &'a dyn Trigger,
        detail: &'a JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Lifecycle notification: the owning scheduler has started.
    fn scheduler_started<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>>;

    fn shutdown<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>>;

    fn supports_persistence(&self) -> bool;

    fn clustered(&self) -> bool;
}

//! In-process job store.
//!
//! Backs tests and single-process deployments. All state lives behind one
//! mutex; every trait method is a short critical section, so no lock is
//! ever held across user code.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::calendar::Calendar;
use crate::job::{JobDetail, JobKey};
use crate::trigger::{
    CompletedExecutionInstruction, MisfireInstruction, Trigger, TriggerKey, TriggerState,
};

use super::{FiredTriggerOutcome, JobStore, StoreError, StoreResult, TriggerFiredBundle};

const DEFAULT_MISFIRE_THRESHOLD: Duration = Duration::from_secs(5);

/// Store-internal trigger state. ACQUIRED and the blocked variants are
/// not externally visible; `get_trigger_state` maps them down to the
/// public [`TriggerState`] set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InternalState {
    Waiting,
    Acquired,
    Blocked,
    Paused,
    PausedBlocked,
    Complete,
    Error,
}

struct TriggerRecord {
    trigger: Box<dyn Trigger>,
    state: InternalState,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, TriggerRecord>,
    calendars: HashMap<String, Box<dyn Calendar>>,
    paused_trigger_groups: HashSet<String>,
    paused_job_groups: HashSet<String>,
    blocked_jobs: HashSet<JobKey>,
}

impl Inner {
    fn calendar_for(&self, trigger: &dyn Trigger) -> Option<&dyn Calendar> {
        trigger
            .calendar_name()
            .and_then(|name| self.calendars.get(name))
            .map(|c| c.as_ref())
    }

    fn initial_state(&self, trigger: &dyn Trigger) -> InternalState {
        let group_paused = self.paused_trigger_groups.contains(&trigger.key().group)
            || trigger
                .job_key()
                .is_some_and(|jk| self.paused_job_groups.contains(&jk.group));
        let job_blocked = trigger.job_key().is_some_and(|jk| self.blocked_jobs.contains(jk));
        match (group_paused, job_blocked) {
            (true, true) => InternalState::PausedBlocked,
            (true, false) => InternalState::Paused,
            (false, true) => InternalState::Blocked,
            (false, false) => InternalState::Waiting,
        }
    }

    fn insert_trigger(&mut self, trigger: &dyn Trigger, replace: bool) -> StoreResult<()> {
        let key = trigger.key().clone();
        let Some(job_key) = trigger.job_key() else {
            return Err(StoreError::Message(format!(
                "trigger {key} is not bound to a job"
            )));
        };
        if !self.jobs.contains_key(job_key) {
            return Err(StoreError::Message(format!(
                "trigger {key} references missing job {job_key}"
            )));
        }
        if !replace && self.triggers.contains_key(&key) {
            return Err(StoreError::ObjectAlreadyExists(format!("trigger {key}")));
        }
        let state = self.initial_state(trigger);
        self.triggers.insert(
            key,
            TriggerRecord {
                trigger: trigger.clone_box(),
                state,
            },
        );
        Ok(())
    }

    fn remove_trigger_record(&mut self, key: &TriggerKey) -> bool {
        let Some(record) = self.triggers.remove(key) else {
            return false;
        };
        if let Some(job_key) = record.trigger.job_key() {
            self.remove_job_if_orphaned(&job_key.clone());
        }
        true
    }

    /// A non-durable job exists iff it has at least one trigger.
    fn remove_job_if_orphaned(&mut self, job_key: &JobKey) {
        let durable = match self.jobs.get(job_key) {
            Some(detail) => detail.is_durable(),
            None => return,
        };
        if durable {
            return;
        }
        let referenced = self
            .triggers
            .values()
            .any(|r| r.trigger.job_key() == Some(job_key));
        if !referenced {
            self.jobs.remove(job_key);
        }
    }

    /// Apply the trigger's misfire policy if its latched fire time fell
    /// further behind than the threshold. Returns false when the trigger
    /// is exhausted afterwards.
    fn apply_misfire(&mut self, key: &TriggerKey, threshold: chrono::Duration) -> bool {
        let Inner {
            triggers,
            calendars,
            ..
        } = self;
        let Some(record) = triggers.get_mut(key) else {
            return false;
        };
        let Some(next) = record.trigger.next_fire_time() else {
            return false;
        };
        if next > Utc::now() - threshold
            || record.trigger.misfire_instruction() == MisfireInstruction::Ignore
        {
            return true;
        }
        let calendar = record
            .trigger
            .calendar_name()
            .and_then(|name| calendars.get(name))
            .map(|c| c.as_ref());
        record.trigger.update_after_misfire(calendar);
        if record.trigger.next_fire_time().is_none() {
            record.state = InternalState::Complete;
            return false;
        }
        true
    }

    fn pause_trigger_record(&mut self, key: &TriggerKey) {
        if let Some(record) = self.triggers.get_mut(key) {
            record.state = match record.state {
                InternalState::Waiting | InternalState::Acquired => InternalState::Paused,
                InternalState::Blocked => InternalState::PausedBlocked,
                other => other,
            };
        }
    }

    fn resume_trigger_record(&mut self, key: &TriggerKey, threshold: chrono::Duration) {
        let Some(record) = self.triggers.get(key) else {
            return;
        };
        if !matches!(
            record.state,
            InternalState::Paused | InternalState::PausedBlocked
        ) {
            return;
        }
        let job_blocked = record
            .trigger
            .job_key()
            .is_some_and(|jk| self.blocked_jobs.contains(jk));
        if !self.apply_misfire(key, threshold) {
            return;
        }
        if let Some(record) = self.triggers.get_mut(key) {
            record.state = if job_blocked {
                InternalState::Blocked
            } else {
                InternalState::Waiting
            };
        }
    }

    fn trigger_keys_for_job(&self, job_key: &JobKey) -> Vec<TriggerKey> {
        self.triggers
            .iter()
            .filter(|(_, r)| r.trigger.job_key() == Some(job_key))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn trigger_keys_in_group(&self, group: &str) -> Vec<TriggerKey> {
        self.triggers
            .keys()
            .filter(|k| k.group == group)
            .cloned()
            .collect()
    }
}

/// The default non-persistent [`JobStore`].
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    misfire_threshold: chrono::Duration,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_misfire_threshold(DEFAULT_MISFIRE_THRESHOLD)
    }

    /// How far behind a latched fire time may fall before the trigger's
    /// misfire policy kicks in.
    pub fn with_misfire_threshold(threshold: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            misfire_threshold: chrono::Duration::from_std(threshold)
                .unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("job store state poisoned")
    }
}

impl JobStore for MemoryJobStore {
    fn store_job<'a>(
        &'a self,
        detail: &'a JobDetail,
        replace: bool,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if !replace && inner.jobs.contains_key(detail.key()) {
                return Err(StoreError::ObjectAlreadyExists(format!(
                    "job {}",
                    detail.key()
                )));
            }
            inner.jobs.insert(detail.key().clone(), detail.clone());
            Ok(())
        })
    }

    fn store_trigger<'a>(
        &'a self,
        trigger: &'a dyn Trigger,
        replace: bool,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move { self.lock().insert_trigger(trigger, replace) })
    }

    fn store_job_and_trigger<'a>(
        &'a self,
        detail: &'a JobDetail,
        trigger: &'a dyn Trigger,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.jobs.contains_key(detail.key()) {
                return Err(StoreError::ObjectAlreadyExists(format!(
                    "job {}",
                    detail.key()
                )));
            }
            if inner.triggers.contains_key(trigger.key()) {
                return Err(StoreError::ObjectAlreadyExists(format!(
                    "trigger {}",
                    trigger.key()
                )));
            }
            inner.jobs.insert(detail.key().clone(), detail.clone());
            inner.insert_trigger(trigger, false)
        })
    }

    fn remove_job<'a>(&'a self, key: &'a JobKey) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move {
            let mut inner = self.lock();
            for trigger_key in inner.trigger_keys_for_job(key) {
                inner.triggers.remove(&trigger_key);
            }
            Ok(inner.jobs.remove(key).is_some())
        })
    }

    fn remove_trigger<'a>(&'a self, key: &'a TriggerKey) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { Ok(self.lock().remove_trigger_record(key)) })
    }

    fn replace_trigger<'a>(
        &'a self,
        key: &'a TriggerKey,
        new_trigger: &'a dyn Trigger,
    ) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let Some(record) = inner.triggers.get(key) else {
                return Ok(false);
            };
            if record.trigger.job_key() != new_trigger.job_key() {
                return Err(StoreError::Message(format!(
                    "replacement for trigger {key} references a different job"
                )));
            }
            inner.triggers.remove(key);
            inner.insert_trigger(new_trigger, false)?;
            Ok(true)
        })
    }

    fn retrieve_job<'a>(
        &'a self,
        key: &'a JobKey,
    ) -> BoxFuture<'a, StoreResult<Option<JobDetail>>> {
        Box::pin(async move { Ok(self.lock().jobs.get(key).cloned()) })
    }

    fn retrieve_trigger<'a>(
        &'a self,
        key: &'a TriggerKey,
    ) -> BoxFuture<'a, StoreResult<Option<Box<dyn Trigger>>>> {
        Box::pin(async move { Ok(self.lock().triggers.get(key).map(|r| r.trigger.clone())) })
    }

    fn store_calendar<'a>(
        &'a self,
        name: &'a str,
        calendar: &'a dyn Calendar,
        replace: bool,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if !replace && inner.calendars.contains_key(name) {
                return Err(StoreError::ObjectAlreadyExists(format!("calendar {name}")));
            }
            inner.calendars.insert(name.to_string(), calendar.clone_box());
            Ok(())
        })
    }

    fn remove_calendar<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let referenced = inner
                .triggers
                .values()
                .any(|r| r.trigger.calendar_name() == Some(name));
            if referenced {
                return Err(StoreError::Message(format!(
                    "calendar {name} is referenced by triggers"
                )));
            }
            Ok(inner.calendars.remove(name).is_some())
        })
    }

    fn retrieve_calendar<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Box<dyn Calendar>>>> {
        Box::pin(async move { Ok(self.lock().calendars.get(name).cloned()) })
    }

    fn get_triggers_for_job<'a>(
        &'a self,
        key: &'a JobKey,
    ) -> BoxFuture<'a, StoreResult<Vec<Box<dyn Trigger>>>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .triggers
                .values()
                .filter(|r| r.trigger.job_key() == Some(key))
                .map(|r| r.trigger.clone())
                .collect())
        })
    }

    fn get_trigger_state<'a>(
        &'a self,
        key: &'a TriggerKey,
    ) -> BoxFuture<'a, StoreResult<TriggerState>> {
        Box::pin(async move {
            let state = match self.lock().triggers.get(key).map(|r| r.state) {
                None => TriggerState::None,
                Some(InternalState::Waiting) | Some(InternalState::Acquired) => {
                    TriggerState::Normal
                }
                Some(InternalState::Paused) | Some(InternalState::PausedBlocked) => {
                    TriggerState::Paused
                }
                Some(InternalState::Blocked) => TriggerState::Blocked,
                Some(InternalState::Complete) => TriggerState::Complete,
                Some(InternalState::Error) => TriggerState::Error,
            };
            Ok(state)
        })
    }

    fn get_job_keys<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<Vec<JobKey>>> {
        Box::pin(async move {
            let mut keys: Vec<_> = self
                .lock()
                .jobs
                .keys()
                .filter(|k| k.group == group)
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    fn get_trigger_keys<'a>(
        &'a self,
        group: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<TriggerKey>>> {
        Box::pin(async move {
            let mut keys = self.lock().trigger_keys_in_group(group);
            keys.sort();
            Ok(keys)
        })
    }

    fn get_job_group_names<'a>(&'a self) -> BoxFuture<'a, StoreResult<Vec<String>>> {
        Box::pin(async move {
            let groups: HashSet<_> = self.lock().jobs.keys().map(|k| k.group.clone()).collect();
            let mut groups: Vec<_> = groups.into_iter().collect();
            groups.sort();
            Ok(groups)
        })
    }

    fn get_trigger_group_names<'a>(&'a self) -> BoxFuture<'a, StoreResult<Vec<String>>> {
        Box::pin(async move {
            let groups: HashSet<_> = self
                .lock()
                .triggers
                .keys()
                .map(|k| k.group.clone())
                .collect();
            let mut groups: Vec<_> = groups.into_iter().collect();
            groups.sort();
            Ok(groups)
        })
    }

    fn pause_trigger<'a>(&'a self, key: &'a TriggerKey) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.lock().pause_trigger_record(key);
            Ok(())
        })
    }

    fn pause_trigger_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.paused_trigger_groups.insert(group.to_string());
            for key in inner.trigger_keys_in_group(group) {
                inner.pause_trigger_record(&key);
            }
            Ok(())
        })
    }

    fn pause_job<'a>(&'a self, key: &'a JobKey) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            for trigger_key in inner.trigger_keys_for_job(key) {
                inner.pause_trigger_record(&trigger_key);
            }
            Ok(())
        })
    }

    fn pause_job_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.paused_job_groups.insert(group.to_string());
            let keys: Vec<_> = inner
                .triggers
                .iter()
                .filter(|(_, r)| r.trigger.job_key().is_some_and(|jk| jk.group == group))
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                inner.pause_trigger_record(&key);
            }
            Ok(())
        })
    }

    fn resume_trigger<'a>(&'a self, key: &'a TriggerKey) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.lock().resume_trigger_record(key, self.misfire_threshold);
            Ok(())
        })
    }

    fn resume_trigger_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.paused_trigger_groups.remove(group);
            for key in inner.trigger_keys_in_group(group) {
                inner.resume_trigger_record(&key, self.misfire_threshold);
            }
            Ok(())
        })
    }

    fn resume_job<'a>(&'a self, key: &'a JobKey) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            for trigger_key in inner.trigger_keys_for_job(key) {
                inner.resume_trigger_record(&trigger_key, self.misfire_threshold);
            }
            Ok(())
        })
    }

    fn resume_job_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.paused_job_groups.remove(group);
            let keys: Vec<_> = inner
                .triggers
                .iter()
                .filter(|(_, r)| r.trigger.job_key().is_some_and(|jk| jk.group == group))
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                inner.resume_trigger_record(&key, self.misfire_threshold);
            }
            Ok(())
        })
    }

    fn pause_all<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let groups: HashSet<_> = inner.triggers.keys().map(|k| k.group.clone()).collect();
            inner.paused_trigger_groups.extend(groups);
            let keys: Vec<_> = inner.triggers.keys().cloned().collect();
            for key in keys {
                inner.pause_trigger_record(&key);
            }
            Ok(())
        })
    }

    fn resume_all<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.paused_trigger_groups.clear();
            inner.paused_job_groups.clear();
            let keys: Vec<_> = inner.triggers.keys().cloned().collect();
            for key in keys {
                inner.resume_trigger_record(&key, self.misfire_threshold);
            }
            Ok(())
        })
    }

    fn get_paused_trigger_groups<'a>(&'a self) -> BoxFuture<'a, StoreResult<HashSet<String>>> {
        Box::pin(async move { Ok(self.lock().paused_trigger_groups.clone()) })
    }

    fn is_trigger_group_paused<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { Ok(self.lock().paused_trigger_groups.contains(group)) })
    }

    fn is_job_group_paused<'a>(&'a self, group: &'a str) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { Ok(self.lock().paused_job_groups.contains(group)) })
    }

    fn acquire_next_triggers<'a>(
        &'a self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: chrono::Duration,
    ) -> BoxFuture<'a, StoreResult<Vec<Box<dyn Trigger>>>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let deadline = no_later_than + time_window;

            let waiting: Vec<TriggerKey> = inner
                .triggers
                .iter()
                .filter(|(_, r)| r.state == InternalState::Waiting)
                .map(|(k, _)| k.clone())
                .collect();

            let mut candidates: Vec<(DateTime<Utc>, Reverse<i32>, TriggerKey)> = Vec::new();
            for key in waiting {
                if !inner.apply_misfire(&key, self.misfire_threshold) {
                    continue;
                }
                let record = &inner.triggers[&key];
                let Some(next) = record.trigger.next_fire_time() else {
                    continue;
                };
                if next <= deadline {
                    candidates.push((next, Reverse(record.trigger.priority()), key));
                }
            }
            candidates.sort();

            let mut acquired = Vec::new();
            for (_, _, key) in candidates.into_iter().take(max_count) {
                let record = inner
                    .triggers
                    .get_mut(&key)
                    .expect("candidate vanished under lock");
                record.state = InternalState::Acquired;
                acquired.push(record.trigger.clone());
            }
            Ok(acquired)
        })
    }

    fn release_acquired_trigger<'a>(
        &'a self,
        trigger: &'a dyn Trigger,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if let Some(record) = inner.triggers.get_mut(trigger.key()) {
                if record.state == InternalState::Acquired {
                    record.state = InternalState::Waiting;
                }
            }
            Ok(())
        })
    }

    fn triggers_fired<'a>(
        &'a self,
        triggers: &'a [Box<dyn Trigger>],
    ) -> BoxFuture<'a, StoreResult<Vec<FiredTriggerOutcome>>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let now = Utc::now();
            let mut outcomes = Vec::with_capacity(triggers.len());

            for acquired in triggers {
                let key = acquired.key().clone();
                let Some(record) = inner.triggers.get(&key) else {
                    outcomes.push(FiredTriggerOutcome::NoFire);
                    continue;
                };
                if record.state != InternalState::Acquired {
                    outcomes.push(FiredTriggerOutcome::NoFire);
                    continue;
                }
                let Some(job_key) = record.trigger.job_key().cloned() else {
                    outcomes.push(FiredTriggerOutcome::Error(StoreError::Message(format!(
                        "fired trigger {key} is not bound to a job"
                    ))));
                    continue;
                };
                let Some(job_detail) = inner.jobs.get(&job_key).cloned() else {
                    outcomes.push(FiredTriggerOutcome::Error(StoreError::Message(format!(
                        "fired trigger {key} references missing job {job_key}"
                    ))));
                    continue;
                };
                let calendar_name = record.trigger.calendar_name().map(str::to_string);
                let calendar = match &calendar_name {
                    Some(name) => match inner.calendars.get(name) {
                        Some(cal) => Some(cal.clone()),
                        None => {
                            outcomes.push(FiredTriggerOutcome::Error(StoreError::Message(
                                format!("calendar {name} for trigger {key} has vanished"),
                            )));
                            continue;
                        }
                    },
                    None => None,
                };

                let record = inner
                    .triggers
                    .get_mut(&key)
                    .expect("record vanished under lock");
                let scheduled_fire_time = record.trigger.next_fire_time();
                let previous_fire_time = record.trigger.previous_fire_time();
                record.trigger.triggered(calendar.as_deref());
                record.state = InternalState::Waiting;
                let bundle = TriggerFiredBundle {
                    job_detail: job_detail.clone(),
                    trigger: record.trigger.clone(),
                    calendar,
                    scheduled_fire_time,
                    fire_time: now,
                    previous_fire_time,
                    next_fire_time: record.trigger.next_fire_time(),
                    recovering: false,
                };

                if job_detail.is_stateful() {
                    // Hold every trigger of this job until the execution
                    // reports complete.
                    inner.blocked_jobs.insert(job_key.clone());
                    for trigger_key in inner.trigger_keys_for_job(&job_key) {
                        if let Some(other) = inner.triggers.get_mut(&trigger_key) {
                            other.state = match other.state {
                                InternalState::Waiting | InternalState::Acquired => {
                                    InternalState::Blocked
                                }
                                InternalState::Paused => InternalState::PausedBlocked,
                                state => state,
                            };
                        }
                    }
                }

                outcomes.push(FiredTriggerOutcome::Fired(Box::new(bundle)));
            }
            Ok(outcomes)
        })
    }

    fn triggered_job_complete<'a>(
        &'a self,
        trigger: &'a dyn Trigger,
        detail: &'a JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let job_key = detail.key().clone();
            let key = trigger.key().clone();

            if detail.is_stateful() {
                inner.blocked_jobs.remove(&job_key);
                for trigger_key in inner.trigger_keys_for_job(&job_key) {
                    if let Some(record) = inner.triggers.get_mut(&trigger_key) {
                        record.state = match record.state {
                            InternalState::Blocked => InternalState::Waiting,
                            InternalState::PausedBlocked => InternalState::Paused,
                            state => state,
                        };
                    }
                }
            }

            match instruction {
                CompletedExecutionInstruction::NoInstruction => {
                    let exhausted = inner
                        .triggers
                        .get(&key)
                        .is_some_and(|r| r.trigger.next_fire_time().is_none());
                    if exhausted {
                        inner.remove_trigger_record(&key);
                    }
                }
                CompletedExecutionInstruction::ReExecuteJob => {
                    // The dispatcher re-runs in place; nothing to persist.
                }
                CompletedExecutionInstruction::SetTriggerComplete => {
                    let may_fire_again = inner
                        .triggers
                        .get(&key)
                        .is_some_and(|r| r.trigger.may_fire_again());
                    if may_fire_again {
                        if let Some(record) = inner.triggers.get_mut(&key) {
                            record.state = InternalState::Complete;
                        }
                    } else {
                        inner.remove_trigger_record(&key);
                    }
                }
                CompletedExecutionInstruction::DeleteTrigger => {
                    inner.remove_trigger_record(&key);
                }
                CompletedExecutionInstruction::SetAllJobTriggersComplete => {
                    for trigger_key in inner.trigger_keys_for_job(&job_key) {
                        if let Some(record) = inner.triggers.get_mut(&trigger_key) {
                            record.state = InternalState::Complete;
                        }
                    }
                }
                CompletedExecutionInstruction::SetTriggerError => {
                    if let Some(record) = inner.triggers.get_mut(&key) {
                        record.state = InternalState::Error;
                    }
                }
                CompletedExecutionInstruction::SetAllJobTriggersError => {
                    for trigger_key in inner.trigger_keys_for_job(&job_key) {
                        if let Some(record) = inner.triggers.get_mut(&trigger_key) {
                            record.state = InternalState::Error;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn scheduler_started<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn shutdown<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn supports_persistence(&self) -> bool {
        false
    }

    fn clustered(&self) -> bool {
        false
    }
}

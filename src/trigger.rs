//! Trigger contract and the repeat-interval trigger implementation.
//!
//! A trigger owns the schedule arithmetic for one job: it knows its next
//! fire time, advances itself when fired, and applies its misfire policy
//! when the scheduler falls behind. The store owns every state transition
//! between [`TriggerState`] values; triggers only produce times.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{DEFAULT_GROUP, JobDataMap, JobExecutionError, JobKey};

/// Group reserved for triggers generated by `Scheduler::trigger_job`.
pub const MANUAL_TRIGGER_GROUP: &str = "MANUAL_TRIGGER";

/// Repeat forever, bounded only by an end time.
pub const REPEAT_INDEFINITELY: i32 = -1;

/// Identity of a stored trigger: name unique within a group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    /// A `None` group canonicalises to [`DEFAULT_GROUP`].
    pub fn new(name: impl Into<String>, group: Option<&str>) -> Self {
        Self {
            name: name.into(),
            group: group.unwrap_or(DEFAULT_GROUP).to_string(),
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Externally visible trigger state, as surfaced by `get_trigger_state`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerState {
    Normal,
    Paused,
    Complete,
    Error,
    Blocked,
    /// The trigger does not exist.
    None,
}

/// Policy applied by the store when a fire time elapsed unobserved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisfireInstruction {
    /// Pick a concrete policy from the trigger's own shape.
    #[default]
    Smart,
    /// Do not adjust anything; elapsed fires happen as soon as possible.
    Ignore,
    /// Reset the next fire time to now, once.
    FireNow,
    /// Skip to the next on-schedule fire time after now.
    NextWithRemainingCount,
}

/// Follow-up action the store takes after an execution completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletedExecutionInstruction {
    NoInstruction,
    ReExecuteJob,
    SetTriggerComplete,
    DeleteTrigger,
    SetAllJobTriggersComplete,
    SetTriggerError,
    SetAllJobTriggersError,
}

/// Schedule descriptor producing fire times for one job.
pub trait Trigger: Send + Sync {
    fn key(&self) -> &TriggerKey;

    /// The job this trigger fires. `None` until the trigger is bound by
    /// `schedule_job(job, trigger)`.
    fn job_key(&self) -> Option<&JobKey>;

    fn set_job_key(&mut self, key: JobKey);

    fn description(&self) -> Option<&str> {
        None
    }

    /// Name of the exclusion calendar consulted for fire times, if any.
    fn calendar_name(&self) -> Option<&str>;

    /// Tie-break weight when several triggers share a fire time. Higher
    /// fires first; the default is 5.
    fn priority(&self) -> i32;

    /// Volatile triggers are excluded from durable recovery.
    fn is_volatile(&self) -> bool;

    /// Payload overlaid on the job's own data map at execution time.
    fn job_data(&self) -> &JobDataMap;

    fn misfire_instruction(&self) -> MisfireInstruction;

    fn end_time(&self) -> Option<DateTime<Utc>>;

    /// Compute and latch the first fire time. Returns `None` when the
    /// trigger will never fire.
    fn compute_first_fire_time(&mut self, calendar: Option<&dyn Calendar>)
    -> Option<DateTime<Utc>>;

    fn next_fire_time(&self) -> Option<DateTime<Utc>>;

    fn previous_fire_time(&self) -> Option<DateTime<Utc>>;

    /// Advance state after a fire: bump counters and latch the next fire
    /// time, honouring the calendar.
    fn triggered(&mut self, calendar: Option<&dyn Calendar>);

    fn may_fire_again(&self) -> bool;

    /// Apply this trigger's misfire policy. Called by the store when the
    /// latched next fire time is further in the past than its threshold.
    fn update_after_misfire(&mut self, calendar: Option<&dyn Calendar>);

    /// Map the outcome of an execution to the store's follow-up action.
    fn execution_complete(
        &self,
        error: Option<&JobExecutionError>,
    ) -> CompletedExecutionInstruction {
        if let Some(err) = error {
            if err.refire_immediately {
                return CompletedExecutionInstruction::ReExecuteJob;
            }
            if err.unschedule_all_triggers {
                return CompletedExecutionInstruction::SetAllJobTriggersError;
            }
            if err.unschedule_firing_trigger {
                return CompletedExecutionInstruction::SetTriggerError;
            }
            if err.set_trigger_complete {
                return CompletedExecutionInstruction::SetTriggerComplete;
            }
            return CompletedExecutionInstruction::NoInstruction;
        }
        if self.may_fire_again() {
            CompletedExecutionInstruction::NoInstruction
        } else {
            CompletedExecutionInstruction::SetTriggerComplete
        }
    }

    fn validate(&self) -> SchedulerResult<()>;

    fn clone_box(&self) -> Box<dyn Trigger>;
}

impl Clone for Box<dyn Trigger> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Fixed-interval trigger: fires at `start_time`, then `repeat_count`
/// further times every `repeat_interval`, optionally bounded by an end
/// time.
#[derive(Clone, Debug)]
pub struct SimpleTrigger {
    key: TriggerKey,
    job_key: Option<JobKey>,
    description: Option<String>,
    calendar_name: Option<String>,
    priority: i32,
    volatile: bool,
    job_data: JobDataMap,
    misfire_instruction: MisfireInstruction,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    repeat_count: i32,
    repeat_interval: Duration,
    times_triggered: i32,
    next_fire_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
}

impl SimpleTrigger {
    /// A one-shot trigger firing at `start_time`.
    pub fn new(key: TriggerKey, start_time: DateTime<Utc>) -> Self {
        Self {
            key,
            job_key: None,
            description: None,
            calendar_name: None,
            priority: 5,
            volatile: false,
            job_data: JobDataMap::new(),
            misfire_instruction: MisfireInstruction::Smart,
            start_time,
            end_time: None,
            repeat_count: 0,
            repeat_interval: Duration::ZERO,
            times_triggered: 0,
            next_fire_time: None,
            previous_fire_time: None,
        }
    }

    pub fn with_job_key(mut self, key: JobKey) -> Self {
        self.job_key = Some(key);
        self
    }

    pub fn with_repeat(mut self, repeat_count: i32, repeat_interval: Duration) -> Self {
        self.repeat_count = repeat_count;
        self.repeat_interval = repeat_interval;
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_calendar_name(mut self, name: impl Into<String>) -> Self {
        self.calendar_name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_volatility(mut self, volatile: bool) -> Self {
        self.volatile = volatile;
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.job_data.insert(key.into(), value);
        self
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn repeat_count(&self) -> i32 {
        self.repeat_count
    }

    pub fn times_triggered(&self) -> i32 {
        self.times_triggered
    }

    /// Pure schedule arithmetic: the first on-grid fire time strictly
    /// after `after`, ignoring the fired-so-far counter.
    pub fn get_fire_time_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let candidate = if after < self.start_time {
            self.start_time
        } else {
            let interval = chrono::Duration::from_std(self.repeat_interval).ok()?;
            if interval.num_milliseconds() <= 0 {
                return None;
            }
            let elapsed = after - self.start_time;
            let n = elapsed.num_milliseconds() / interval.num_milliseconds() + 1;
            if self.repeat_count != REPEAT_INDEFINITELY && n > i64::from(self.repeat_count) {
                return None;
            }
            self.start_time + interval * (n as i32)
        };
        match self.end_time {
            Some(end) if candidate >= end => None,
            _ => Some(candidate),
        }
    }

    /// Step past calendar-excluded times. Gives up (returns `None`) if no
    /// included time remains within the repeat bounds, or after a bounded
    /// number of steps for unbounded triggers inside an endless blackout.
    fn advance_past_exclusions(
        &self,
        mut candidate: Option<DateTime<Utc>>,
        calendar: Option<&dyn Calendar>,
    ) -> Option<DateTime<Utc>> {
        const MAX_STEPS: usize = 100_000;
        let calendar = calendar?;
        for _ in 0..MAX_STEPS {
            let t = candidate?;
            if calendar.is_time_included(t) {
                return Some(t);
            }
            candidate = self.get_fire_time_after(t);
        }
        None
    }
}

impl Trigger for SimpleTrigger {
    fn key(&self) -> &TriggerKey {
        &self.key
    }

    fn job_key(&self) -> Option<&JobKey> {
        self.job_key.as_ref()
    }

    fn set_job_key(&mut self, key: JobKey) {
        self.job_key = Some(key);
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn calendar_name(&self) -> Option<&str> {
        self.calendar_name.as_deref()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_volatile(&self) -> bool {
        self.volatile
    }

    fn job_data(&self) -> &JobDataMap {
        &self.job_data
    }

    fn misfire_instruction(&self) -> MisfireInstruction {
        self.misfire_instruction
    }

    fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    fn compute_first_fire_time(
        &mut self,
        calendar: Option<&dyn Calendar>,
    ) -> Option<DateTime<Utc>> {
        let first = match self.end_time {
            Some(end) if self.start_time >= end => None,
            _ => Some(self.start_time),
        };
        let first = match calendar {
            Some(_) => self.advance_past_exclusions(first, calendar),
            None => first,
        };
        self.next_fire_time = first;
        first
    }

    fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    fn triggered(&mut self, calendar: Option<&dyn Calendar>) {
        self.times_triggered += 1;
        self.previous_fire_time = self.next_fire_time;

        let Some(fired_at) = self.next_fire_time else {
            return;
        };
        if self.repeat_count != REPEAT_INDEFINITELY && self.times_triggered > self.repeat_count {
            self.next_fire_time = None;
            return;
        }
        // Advance from the later of the nominal time and the clock, so a
        // backlog of elapsed fire times collapses into one catch-up fire.
        let basis = fired_at.max(Utc::now());
        let mut next = self.get_fire_time_after(basis);
        if calendar.is_some() {
            next = self.advance_past_exclusions(next, calendar);
        }
        self.next_fire_time = next;
    }

    fn may_fire_again(&self) -> bool {
        self.next_fire_time.is_some()
    }

    fn update_after_misfire(&mut self, calendar: Option<&dyn Calendar>) {
        let instruction = match self.misfire_instruction {
            MisfireInstruction::Smart => {
                if self.repeat_count == 0 {
                    MisfireInstruction::FireNow
                } else {
                    MisfireInstruction::NextWithRemainingCount
                }
            }
            other => other,
        };
        match instruction {
            MisfireInstruction::Ignore => {}
            MisfireInstruction::FireNow => {
                self.next_fire_time = Some(Utc::now());
            }
            MisfireInstruction::NextWithRemainingCount => {
                let mut next = self.get_fire_time_after(Utc::now());
                if calendar.is_some() {
                    next = self.advance_past_exclusions(next, calendar);
                }
                self.next_fire_time = next;
            }
            MisfireInstruction::Smart => unreachable!("resolved above"),
        }
    }

    fn validate(&self) -> SchedulerResult<()> {
        if self.key.name.is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "trigger name must not be empty".into(),
            ));
        }
        if self.repeat_count != 0 && self.repeat_interval.is_zero() {
            return Err(SchedulerError::InvalidArgument(format!(
                "trigger {} repeats but has a zero interval",
                self.key
            )));
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Trigger> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(start: DateTime<Utc>) -> SimpleTrigger {
        SimpleTrigger::new(TriggerKey::new("t", None), start)
            .with_job_key(JobKey::new("j", None))
    }

    #[test]
    fn one_shot_fires_once() {
        let start = Utc::now();
        let mut t = base(start);
        assert_eq!(t.compute_first_fire_time(None), Some(start));
        t.triggered(None);
        assert_eq!(t.previous_fire_time(), Some(start));
        assert!(!t.may_fire_again());
    }

    #[test]
    fn repeat_count_bounds_total_fires() {
        let start = Utc::now();
        let mut t = base(start).with_repeat(2, Duration::from_millis(100));
        t.compute_first_fire_time(None);
        let mut fires = 0;
        while t.may_fire_again() {
            t.triggered(None);
            fires += 1;
            assert!(fires <= 3, "repeat_count=2 means at most 3 fires");
        }
        assert_eq!(fires, 3);
    }

    #[test]
    fn fire_times_stay_on_the_start_grid() {
        let start = Utc::now() + chrono::Duration::seconds(10);
        let t = base(start).with_repeat(REPEAT_INDEFINITELY, Duration::from_secs(30));
        let after = start + chrono::Duration::seconds(45);
        assert_eq!(
            t.get_fire_time_after(after),
            Some(start + chrono::Duration::seconds(60))
        );
    }

    #[test]
    fn end_time_cuts_off_fires() {
        let start = Utc::now();
        let mut t = base(start)
            .with_repeat(REPEAT_INDEFINITELY, Duration::from_secs(10))
            .with_end_time(start + chrono::Duration::seconds(25));
        t.compute_first_fire_time(None);
        assert_eq!(
            t.get_fire_time_after(start + chrono::Duration::seconds(15)),
            Some(start + chrono::Duration::seconds(20))
        );
        assert_eq!(t.get_fire_time_after(start + chrono::Duration::seconds(20)), None);
    }

    #[test]
    fn misfire_fire_now_for_one_shot() {
        let start = Utc::now() - chrono::Duration::seconds(60);
        let mut t = base(start);
        t.compute_first_fire_time(None);
        t.update_after_misfire(None);
        let next = t.next_fire_time().expect("one-shot reschedules to now");
        assert!(next > start);
        assert!((Utc::now() - next).num_seconds().abs() < 2);
    }

    #[test]
    fn misfire_skips_to_next_grid_slot_for_repeating() {
        let start = Utc::now() - chrono::Duration::seconds(95);
        let mut t = base(start).with_repeat(REPEAT_INDEFINITELY, Duration::from_secs(30));
        t.compute_first_fire_time(None);
        t.update_after_misfire(None);
        let next = t.next_fire_time().expect("repeating trigger continues");
        assert!(next > Utc::now() - chrono::Duration::seconds(1));
        let offset_ms = (next - start).num_milliseconds() % 30_000;
        assert_eq!(offset_ms, 0, "misfire recovery must stay on the grid");
    }

    #[test]
    fn zero_interval_repeat_rejected() {
        let t = base(Utc::now()).with_repeat(5, Duration::ZERO);
        assert!(t.validate().is_err());
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn next_fire_time_is_strictly_after(
                offset_ms in 0i64..1_000_000,
                interval_ms in 1u64..100_000,
                repeat in 0i32..50,
            ) {
                let start = Utc::now();
                let t = base(start).with_repeat(repeat, Duration::from_millis(interval_ms));
                let after = start + chrono::Duration::milliseconds(offset_ms);
                if let Some(next) = t.get_fire_time_after(after) {
                    prop_assert!(next > after);
                    let offset = (next - start).num_milliseconds();
                    prop_assert_eq!(offset % interval_ms as i64, 0);
                }
            }

            #[test]
            fn total_fires_never_exceed_repeat_count(
                interval_ms in 1u64..10_000,
                repeat in 0i32..20,
            ) {
                let start = Utc::now() + chrono::Duration::days(1);
                let mut t = base(start).with_repeat(repeat, Duration::from_millis(interval_ms));
                t.compute_first_fire_time(None);
                let mut fires = 0;
                while t.may_fire_again() && fires <= repeat + 2 {
                    t.triggered(None);
                    fires += 1;
                }
                prop_assert_eq!(fires, repeat + 1);
            }
        }
    }
}

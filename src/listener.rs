//! Listener contracts and the global/internal listener registry.
//!
//! Three independent categories: job, trigger, and scheduler listeners.
//! Job and trigger listeners are name-keyed; scheduler listeners are
//! positional. Each category is split into a *global* (user-registered)
//! and an *internal* (reserved) sublist; notification order within a
//! category is registration order, globals first.

use std::sync::{Arc, Mutex};

use tracing::error;

use crate::error::{SchedulerError, SchedulerResult};
use crate::execution::JobExecutionContext;
use crate::job::{JobDetail, JobExecutionError, JobKey};
use crate::trigger::{CompletedExecutionInstruction, Trigger, TriggerKey};

/// Listener callbacks report failures as boxed errors; the dispatcher
/// wraps them into [`SchedulerError::Listener`] and keeps going.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Observes the execution lifecycle of jobs.
pub trait JobListener: Send + Sync {
    /// Non-empty, unique within the job-listener list.
    fn name(&self) -> &str;

    fn job_to_be_executed(&self, _ctx: &Arc<JobExecutionContext>) -> ListenerResult {
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
        Ok(())
    }
}

/// Observes trigger firings and may veto the resulting execution.
pub trait TriggerListener: Send + Sync {
    /// Non-empty, unique within the trigger-listener list.
    fn name(&self) -> &str;

    fn trigger_fired(&self, _ctx: &Arc<JobExecutionContext>) -> ListenerResult {
        Ok(())
    }

    /// Return true to veto: the job body will not run.
    fn veto_job_execution(
        &self,
        _ctx: &Arc<JobExecutionContext>,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        Ok(false)
    }

    fn trigger_complete(
        &self,
        _ctx: &Arc<JobExecutionContext>,
        _instruction: CompletedExecutionInstruction,
    ) -> ListenerResult {
        Ok(())
    }
}

/// Observes scheduler-level events. Callbacks are infallible; anything a
/// listener wants to surface goes through its own channels.
pub trait SchedulerListener: Send + Sync {
    fn job_scheduled(&self, _trigger: &dyn Trigger) {}

    fn job_unscheduled(&self, _trigger_key: &TriggerKey) {}

    fn job_added(&self, _detail: &JobDetail) {}

    fn job_deleted(&self, _job_key: &JobKey) {}

    fn triggers_paused(&self, _trigger_name: Option<&str>, _group: &str) {}

    fn triggers_resumed(&self, _trigger_name: Option<&str>, _group: &str) {}

    fn jobs_paused(&self, _job_name: Option<&str>, _group: &str) {}

    fn jobs_resumed(&self, _job_name: Option<&str>, _group: &str) {}

    fn scheduler_error(&self, _message: &str, _error: &SchedulerError) {}

    fn scheduler_started(&self) {}

    fn scheduler_in_standby_mode(&self) {}

    fn scheduler_shutting_down(&self) {}

    fn scheduler_shutdown(&self) {}
}

struct NamedList<L: ?Sized> {
    global: Vec<Arc<L>>,
    internal: Vec<Arc<L>>,
}

impl<L: ?Sized> Default for NamedList<L> {
    fn default() -> Self {
        Self {
            global: Vec::new(),
            internal: Vec::new(),
        }
    }
}

impl<L: ?Sized> NamedList<L> {
    /// Globals first, then internals, each in registration order.
    fn snapshot(&self) -> Vec<Arc<L>> {
        self.global.iter().chain(&self.internal).cloned().collect()
    }
}

/// Holds the three listener lists. All mutation and snapshot reads take
/// the per-list lock; iteration always operates on a snapshot taken under
/// the lock, never on the live list.
#[derive(Default)]
pub struct ListenerRegistry {
    job: Mutex<NamedList<dyn JobListener>>,
    trigger: Mutex<NamedList<dyn TriggerListener>>,
    scheduler: Mutex<NamedList<dyn SchedulerListener>>,
}

fn check_name<L, F>(list: &[Arc<L>], name: &str, name_of: F) -> SchedulerResult<()>
where
    L: ?Sized,
    F: Fn(&L) -> &str,
{
    if name.is_empty() {
        return Err(SchedulerError::InvalidArgument(
            "listener name must not be empty".into(),
        ));
    }
    if list.iter().any(|l| name_of(l) == name) {
        return Err(SchedulerError::InvalidArgument(format!(
            "listener {name} is already registered"
        )));
    }
    Ok(())
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>) -> SchedulerResult<()> {
        let mut list = self.job.lock().expect("job listener list poisoned");
        check_name(&list.global, listener.name(), |l| l.name())?;
        check_name(&list.internal, listener.name(), |l| l.name())?;
        list.global.push(listener);
        Ok(())
    }

    pub(crate) fn add_internal_job_listener(
        &self,
        listener: Arc<dyn JobListener>,
    ) -> SchedulerResult<()> {
        let mut list = self.job.lock().expect("job listener list poisoned");
        check_name(&list.global, listener.name(), |l| l.name())?;
        check_name(&list.internal, listener.name(), |l| l.name())?;
        list.internal.push(listener);
        Ok(())
    }

    pub fn remove_job_listener(&self, name: &str) -> bool {
        let mut list = self.job.lock().expect("job listener list poisoned");
        let before = list.global.len();
        list.global.retain(|l| l.name() != name);
        list.global.len() != before
    }

    pub fn get_job_listener(&self, name: &str) -> Option<Arc<dyn JobListener>> {
        self.job
            .lock()
            .expect("job listener list poisoned")
            .global
            .iter()
            .find(|l| l.name() == name)
            .cloned()
    }

    pub(crate) fn job_listeners(&self) -> Vec<Arc<dyn JobListener>> {
        self.job.lock().expect("job listener list poisoned").snapshot()
    }

    pub fn add_trigger_listener(&self, listener: Arc<dyn TriggerListener>) -> SchedulerResult<()> {
        let mut list = self.trigger.lock().expect("trigger listener list poisoned");
        check_name(&list.global, listener.name(), |l| l.name())?;
        check_name(&list.internal, listener.name(), |l| l.name())?;
        list.global.push(listener);
        Ok(())
    }

    pub fn remove_trigger_listener(&self, name: &str) -> bool {
        let mut list = self.trigger.lock().expect("trigger listener list poisoned");
        let before = list.global.len();
        list.global.retain(|l| l.name() != name);
        list.global.len() != before
    }

    pub fn get_trigger_listener(&self, name: &str) -> Option<Arc<dyn TriggerListener>> {
        self.trigger
            .lock()
            .expect("trigger listener list poisoned")
            .global
            .iter()
            .find(|l| l.name() == name)
            .cloned()
    }

    pub(crate) fn trigger_listeners(&self) -> Vec<Arc<dyn TriggerListener>> {
        self.trigger
            .lock()
            .expect("trigger listener list poisoned")
            .snapshot()
    }

    pub fn add_scheduler_listener(&self, listener: Arc<dyn SchedulerListener>) {
        self.scheduler
            .lock()
            .expect("scheduler listener list poisoned")
            .global
            .push(listener);
    }

    pub(crate) fn add_internal_scheduler_listener(&self, listener: Arc<dyn SchedulerListener>) {
        self.scheduler
            .lock()
            .expect("scheduler listener list poisoned")
            .internal
            .push(listener);
    }

    /// Positional removal: drops the first entry that is the same
    /// allocation as `listener`.
    pub fn remove_scheduler_listener(&self, listener: &Arc<dyn SchedulerListener>) -> bool {
        let mut list = self.scheduler.lock().expect("scheduler listener list poisoned");
        match list.global.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(idx) => {
                list.global.remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn scheduler_listeners(&self) -> Vec<Arc<dyn SchedulerListener>> {
        self.scheduler
            .lock()
            .expect("scheduler listener list poisoned")
            .snapshot()
    }

    /// Fan an event out to every scheduler listener.
    pub(crate) fn notify_scheduler_listeners(&self, notify: impl Fn(&dyn SchedulerListener)) {
        for listener in self.scheduler_listeners() {
            notify(listener.as_ref());
        }
    }

    pub(crate) fn notify_scheduler_error(&self, message: &str, err: &SchedulerError) {
        self.notify_scheduler_listeners(|l| l.scheduler_error(message, err));
    }
}

/// Reserved internal scheduler listener that writes `scheduler_error`
/// events to the log.
pub(crate) struct LoggingErrorListener;

impl SchedulerListener for LoggingErrorListener {
    fn scheduler_error(&self, message: &str, error: &SchedulerError) {
        error!(error = %error, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl JobListener for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn job_listener_names_must_be_unique_and_non_empty() {
        let registry = ListenerRegistry::new();
        registry.add_job_listener(Arc::new(Named("a"))).unwrap();
        assert!(registry.add_job_listener(Arc::new(Named("a"))).is_err());
        assert!(registry.add_job_listener(Arc::new(Named(""))).is_err());
        assert!(registry.get_job_listener("a").is_some());
        assert!(registry.remove_job_listener("a"));
        assert!(!registry.remove_job_listener("a"));
    }

    #[test]
    fn internal_listeners_follow_globals_in_snapshots() {
        let registry = ListenerRegistry::new();
        registry
            .add_internal_job_listener(Arc::new(Named("internal")))
            .unwrap();
        registry.add_job_listener(Arc::new(Named("global"))).unwrap();
        let names: Vec<_> = registry.job_listeners().iter().map(|l| l.name().to_string()).collect();
        assert_eq!(names, vec!["global", "internal"]);
    }

    #[test]
    fn scheduler_listener_removal_is_positional() {
        struct Quiet;
        impl SchedulerListener for Quiet {}

        let registry = ListenerRegistry::new();
        let first: Arc<dyn SchedulerListener> = Arc::new(Quiet);
        let second: Arc<dyn SchedulerListener> = Arc::new(Quiet);
        registry.add_scheduler_listener(Arc::clone(&first));
        registry.add_scheduler_listener(Arc::clone(&second));
        assert!(registry.remove_scheduler_listener(&first));
        assert!(!registry.remove_scheduler_listener(&first));
        assert_eq!(registry.scheduler_listeners().len(), 1);
    }
}

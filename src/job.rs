//! Job identity, payload, and the executable-unit contract.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SchedulerError, SchedulerResult};
use crate::execution::JobExecutionContext;

/// Group assigned when the caller does not name one.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Identity of a stored job: name unique within a group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    /// A `None` group canonicalises to [`DEFAULT_GROUP`].
    pub fn new(name: impl Into<String>, group: Option<&str>) -> Self {
        Self {
            name: name.into(),
            group: group.unwrap_or(DEFAULT_GROUP).to_string(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// String-keyed payload handed to the job at execution time.
pub type JobDataMap = HashMap<String, Value>;

/// Durable description of a job: identity, implementation id, payload, flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobDetail {
    key: JobKey,
    /// Identifier resolved by the [`JobFactory`] to an executable instance.
    job_type: String,
    description: Option<String>,
    job_data: JobDataMap,
    durable: bool,
    stateful: bool,
    requests_recovery: bool,
}

impl JobDetail {
    pub fn new(key: JobKey, job_type: impl Into<String>) -> Self {
        Self {
            key,
            job_type: job_type.into(),
            description: None,
            job_data: JobDataMap::new(),
            durable: false,
            stateful: false,
            requests_recovery: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.job_data.insert(key.into(), value);
        self
    }

    /// A durable job may exist without any trigger referencing it.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// A stateful job forbids concurrent executions of the same identity.
    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    pub fn requests_recovery(mut self, requests_recovery: bool) -> Self {
        self.requests_recovery = requests_recovery;
        self
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn job_data(&self) -> &JobDataMap {
        &self.job_data
    }

    pub fn job_data_mut(&mut self) -> &mut JobDataMap {
        &mut self.job_data
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    pub fn is_recovery_requested(&self) -> bool {
        self.requests_recovery
    }

    /// Basic shape validation applied by the facade before storage.
    pub(crate) fn validate(&self) -> SchedulerResult<()> {
        if self.key.name.is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "job name must not be empty".into(),
            ));
        }
        if self.job_type.is_empty() {
            return Err(SchedulerError::InvalidArgument(format!(
                "job {} has no job type",
                self.key
            )));
        }
        Ok(())
    }
}

/// Error raised from a job body. The flags steer the store's follow-up
/// action on the trigger once the execution completes.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct JobExecutionError {
    pub message: String,
    pub refire_immediately: bool,
    pub unschedule_firing_trigger: bool,
    pub unschedule_all_triggers: bool,
    pub set_trigger_complete: bool,
}

impl JobExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            refire_immediately: false,
            unschedule_firing_trigger: false,
            unschedule_all_triggers: false,
            set_trigger_complete: false,
        }
    }

    pub fn refire_immediately(mut self) -> Self {
        self.refire_immediately = true;
        self
    }

    pub fn unschedule_firing_trigger(mut self) -> Self {
        self.unschedule_firing_trigger = true;
        self
    }

    pub fn unschedule_all_triggers(mut self) -> Self {
        self.unschedule_all_triggers = true;
        self
    }

    pub fn set_trigger_complete(mut self) -> Self {
        self.set_trigger_complete = true;
        self
    }
}

/// A user-defined unit of work.
///
/// Implementations are shared across fires; per-fire state belongs in the
/// [`JobExecutionContext`]. A job that wants to be cancellable on shutdown
/// or via `Scheduler::interrupt` opts in through [`Job::is_interruptible`]
/// and reacts to [`Job::interrupt`] cooperatively.
pub trait Job: Send + Sync {
    fn execute<'a>(
        &'a self,
        ctx: &'a JobExecutionContext,
    ) -> BoxFuture<'a, Result<Option<Value>, JobExecutionError>>;

    fn is_interruptible(&self) -> bool {
        false
    }

    /// Cooperative cancellation signal. Only called when
    /// [`Job::is_interruptible`] returns true.
    fn interrupt(&self) {}
}

/// Resolves a [`JobDetail`]'s `job_type` to an executable instance.
pub trait JobFactory: Send + Sync {
    fn create(&self, detail: &JobDetail) -> SchedulerResult<Arc<dyn Job>>;
}

/// Registry-backed factory: job types are registered up front and handed
/// out by name.
#[derive(Default)]
pub struct SimpleJobFactory {
    jobs: Mutex<HashMap<String, Arc<dyn Job>>>,
}

impl SimpleJobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_type: impl Into<String>, job: Arc<dyn Job>) {
        self.jobs
            .lock()
            .expect("job factory registry poisoned")
            .insert(job_type.into(), job);
    }
}

impl JobFactory for SimpleJobFactory {
    fn create(&self, detail: &JobDetail) -> SchedulerResult<Arc<dyn Job>> {
        self.jobs
            .lock()
            .expect("job factory registry poisoned")
            .get(detail.job_type())
            .cloned()
            .ok_or_else(|| SchedulerError::JobFactory {
                job: detail.key().clone(),
                message: format!("no job registered for type {}", detail.job_type()),
            })
    }
}

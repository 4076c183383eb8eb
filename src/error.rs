//! Crate-wide error taxonomy.

use crate::job::JobKey;
use crate::store::StoreError;
use crate::trigger::TriggerKey;
use crate::worker_pool::WorkerPoolError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// An operation was invoked after the scheduler shut down.
    #[error("scheduler has been shut down")]
    Shutdown,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A trigger was bound to a job other than the one being scheduled.
    #[error("trigger {trigger} references job {actual}, expected {expected}")]
    InvalidTriggerBinding {
        trigger: TriggerKey,
        expected: JobKey,
        actual: JobKey,
    },

    /// First-fire-time computation produced nothing.
    #[error("trigger {0} will never fire")]
    NeverFires(TriggerKey),

    #[error("calendar not found: {0}")]
    CalendarNotFound(String),

    #[error("job {0} is not durable and cannot be stored without a trigger")]
    NonDurableWithoutTrigger(JobKey),

    #[error("scheduler {0} is already registered")]
    DuplicateScheduler(String),

    /// `interrupt` matched an executing job that does not support interruption.
    #[error("job {0} is not interruptible")]
    JobNotInterruptible(JobKey),

    /// Deleting a job aborted because one of its triggers could not be removed.
    #[error("delete of job {job} aborted: {source}")]
    DeleteConflict {
        job: JobKey,
        #[source]
        source: StoreError,
    },

    /// Resolving the job instance through the configured factory failed.
    #[error("job factory failed for {job}: {message}")]
    JobFactory { job: JobKey, message: String },

    /// A job or trigger listener returned an error from a callback.
    #[error("listener {name} failed: {message}")]
    Listener { name: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    WorkerPool(#[from] WorkerPoolError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

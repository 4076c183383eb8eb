//! Cadence - a general-purpose job scheduler
//!
//! Cadence arranges for user-defined jobs to execute on a managed worker
//! pool at every fire time their triggers prescribe. The key components
//! are:
//!
//! ## Scheduling core
//!
//! - [`Scheduler`]: the public facade - schedule, pause, resume, fire
//!   manually, and drive the lifecycle
//! - `SchedulingLoop`: background task that acquires due triggers from
//!   the store and hands fired bundles to the dispatcher
//! - [`ListenerRegistry`]: job, trigger, and scheduler listener lists
//!
//! ## Collaborator seams
//!
//! - [`JobStore`]: durable set of jobs, triggers, and calendars;
//!   [`MemoryJobStore`] is the in-process implementation
//! - [`WorkerPool`]: bounded concurrent execution; [`TokioWorkerPool`] is
//!   the semaphore-backed default
//! - [`Trigger`]: schedule arithmetic contract; [`SimpleTrigger`] covers
//!   fixed-interval repetition
//!
//! Scheduling a job and letting it fire:
//!
//! ```rust,ignore
//! let factory = Arc::new(SimpleJobFactory::new());
//! factory.register("report", Arc::new(ReportJob));
//!
//! let scheduler = Scheduler::new(
//!     "main",
//!     SchedulerConfig::from_env(),
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(TokioWorkerPool::new(4)),
//!     factory,
//! )?;
//! let detail = JobDetail::new(JobKey::new("nightly", None), "report");
//! let trigger = SimpleTrigger::new(TriggerKey::new("nightly", None), start_at);
//! scheduler.schedule_job(detail, Box::new(trigger)).await?;
//! scheduler.start().await?;
//! ```

pub mod calendar;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod job;
pub mod listener;
pub mod repository;
pub mod scheduler;
pub mod scheduling_loop;
pub mod signaler;
pub mod store;
pub mod trigger;
pub mod worker_pool;

// Facade and lifecycle
pub use scheduler::{Scheduler, SchedulerMetadata};
pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use repository::SchedulerRepository;

// Jobs and triggers
pub use job::{
    DEFAULT_GROUP, Job, JobDataMap, JobDetail, JobExecutionError, JobFactory, JobKey,
    SimpleJobFactory,
};
pub use trigger::{
    CompletedExecutionInstruction, MANUAL_TRIGGER_GROUP, MisfireInstruction, REPEAT_INDEFINITELY,
    SimpleTrigger, Trigger, TriggerKey, TriggerState,
};
pub use calendar::{BlackoutCalendar, Calendar};
pub use execution::{ExecutionTracker, JobExecutionContext};

// Collaborator seams
pub use store::{
    FiredTriggerOutcome, JobStore, MemoryJobStore, StoreError, StoreResult, TriggerFiredBundle,
};
pub use worker_pool::{TokioWorkerPool, WorkerPool, WorkerPoolError};

// Listeners
pub use listener::{
    JobListener, ListenerRegistry, ListenerResult, SchedulerListener, TriggerListener,
};
pub use signaler::Signaler;

//! Turns fired triggers into job executions.
//!
//! One dispatch runs the full listener protocol around a job body:
//! `trigger_fired` (with veto) → `job_to_be_executed` → body →
//! `job_was_executed` → `trigger_complete` → store completion. Listener
//! failures never abort the scheduler; they surface as `scheduler_error`
//! events and, where a firing was already underway, as a trigger ERROR
//! state.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::execution::{ExecutionTracker, JobExecutionContext};
use crate::job::{JobDetail, JobExecutionError, JobFactory};
use crate::listener::ListenerRegistry;
use crate::signaler::Signaler;
use crate::store::{JobStore, TriggerFiredBundle};
use crate::trigger::{CompletedExecutionInstruction, Trigger};
use crate::worker_pool::WorkerPool;

pub(crate) struct Dispatcher {
    store: Arc<dyn JobStore>,
    pool: Arc<dyn WorkerPool>,
    listeners: Arc<ListenerRegistry>,
    tracker: Arc<ExecutionTracker>,
    signaler: Arc<Signaler>,
    job_factory: Arc<dyn JobFactory>,
    signal_on_change: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        pool: Arc<dyn WorkerPool>,
        listeners: Arc<ListenerRegistry>,
        tracker: Arc<ExecutionTracker>,
        signaler: Arc<Signaler>,
        job_factory: Arc<dyn JobFactory>,
        signal_on_change: bool,
    ) -> Self {
        Self {
            store,
            pool,
            listeners,
            tracker,
            signaler,
            job_factory,
            signal_on_change,
        }
    }

    /// Run the pre-execution protocol for one fired trigger and submit the
    /// body to the worker pool. Errors returned here have already been
    /// reported to scheduler listeners.
    pub(crate) async fn dispatch(
        self: Arc<Self>,
        bundle: TriggerFiredBundle,
    ) -> SchedulerResult<()> {
        let job = match self.job_factory.create(&bundle.job_detail) {
            Ok(job) => job,
            Err(err) => {
                self.listeners.notify_scheduler_error(
                    &format!("could not instantiate job {}", bundle.job_detail.key()),
                    &err,
                );
                self.complete_quietly(
                    bundle.trigger.as_ref(),
                    &bundle.job_detail,
                    CompletedExecutionInstruction::SetAllJobTriggersError,
                )
                .await;
                return Err(err);
            }
        };
        let ctx = Arc::new(JobExecutionContext::new(bundle, job));

        let vetoed = match self.notify_trigger_listeners_fired(&ctx) {
            Ok(vetoed) => vetoed,
            Err(err) => {
                self.listeners
                    .notify_scheduler_error("trigger listener failed while firing", &err);
                self.complete_quietly(
                    ctx.trigger(),
                    ctx.job_detail(),
                    CompletedExecutionInstruction::SetTriggerError,
                )
                .await;
                return Err(err);
            }
        };

        if vetoed {
            debug!(trigger = %ctx.trigger().key(), "execution vetoed by trigger listener");
            if let Err(err) = self.notify_job_listeners_vetoed(&ctx) {
                self.listeners
                    .notify_scheduler_error("job listener failed on veto", &err);
            }
            // Either way the completion goes through the store so the
            // concurrency lock taken at fire time for a stateful job is
            // released along with its blocked sibling triggers.
            let instruction = if ctx.trigger().next_fire_time().is_none() {
                CompletedExecutionInstruction::SetTriggerComplete
            } else {
                CompletedExecutionInstruction::NoInstruction
            };
            self.complete_quietly(ctx.trigger(), ctx.job_detail(), instruction)
                .await;
            self.signal(ctx.trigger().next_fire_time());
            return Ok(());
        }

        if let Err(err) = self.notify_job_listeners_to_be_executed(&ctx) {
            self.listeners
                .notify_scheduler_error("job listener failed before execution", &err);
            self.tracker.remove(ctx.fire_instance_id());
            self.complete_quietly(
                ctx.trigger(),
                ctx.job_detail(),
                CompletedExecutionInstruction::SetTriggerError,
            )
            .await;
            return Err(err);
        }

        let runner = Arc::clone(&self);
        let run_ctx = Arc::clone(&ctx);
        if let Err(err) = self
            .pool
            .run_in_worker(Box::pin(async move { runner.run_job(run_ctx).await }))
        {
            let err = SchedulerError::from(err);
            self.listeners
                .notify_scheduler_error("worker pool rejected execution", &err);
            self.tracker.remove(ctx.fire_instance_id());
            self.complete_quietly(
                ctx.trigger(),
                ctx.job_detail(),
                CompletedExecutionInstruction::SetTriggerError,
            )
            .await;
            return Err(err);
        }
        Ok(())
    }

    /// The in-worker half: invoke the body and run the post-execution
    /// protocol, re-executing in place as long as the instruction says so.
    async fn run_job(&self, ctx: Arc<JobExecutionContext>) {
        loop {
            let outcome = AssertUnwindSafe(ctx.job_instance().execute(&ctx))
                .catch_unwind()
                .await;
            let error: Option<JobExecutionError> = match outcome {
                Ok(Ok(value)) => {
                    ctx.set_result(value);
                    None
                }
                Ok(Err(err)) => Some(err),
                Err(panic) => Some(JobExecutionError::new(panic_message(&panic))),
            };
            if let Some(err) = &error {
                debug!(
                    job = %ctx.job_detail().key(),
                    fire_instance = %ctx.fire_instance_id(),
                    error = %err,
                    "job execution failed"
                );
            }

            let instruction = ctx.trigger().execution_complete(error.as_ref());

            if let Err(err) = self.notify_job_listeners_was_executed(&ctx, error.as_ref()) {
                self.listeners
                    .notify_scheduler_error("job listener failed after execution", &err);
            }
            if let Err(err) = self.notify_trigger_listeners_complete(&ctx, instruction) {
                self.listeners
                    .notify_scheduler_error("trigger listener failed on completion", &err);
            }

            if instruction == CompletedExecutionInstruction::ReExecuteJob {
                ctx.increment_refire_count();
                continue;
            }

            if let Err(err) = self
                .store
                .triggered_job_complete(ctx.trigger(), ctx.job_detail(), instruction)
                .await
            {
                self.listeners.notify_scheduler_error(
                    &format!(
                        "failed to record completion of job {}",
                        ctx.job_detail().key()
                    ),
                    &err.into(),
                );
            }
            self.tracker.remove(ctx.fire_instance_id());
            self.signal(ctx.trigger().next_fire_time());
            return;
        }
    }

    async fn complete_quietly(
        &self,
        trigger: &dyn Trigger,
        detail: &JobDetail,
        instruction: CompletedExecutionInstruction,
    ) {
        if let Err(err) = self
            .store
            .triggered_job_complete(trigger, detail, instruction)
            .await
        {
            warn!(
                trigger = %trigger.key(),
                error = %err,
                "failed to record trigger completion"
            );
        }
    }

    fn signal(&self, candidate: Option<DateTime<Utc>>) {
        if self.signal_on_change {
            self.signaler.signal_scheduling_change(candidate);
        }
    }

    /// First veto short-circuits; remaining listeners are not consulted.
    fn notify_trigger_listeners_fired(
        &self,
        ctx: &Arc<JobExecutionContext>,
    ) -> SchedulerResult<bool> {
        for listener in self.listeners.trigger_listeners() {
            listener
                .trigger_fired(ctx)
                .map_err(|e| listener_error(listener.name(), e))?;
            if listener
                .veto_job_execution(ctx)
                .map_err(|e| listener_error(listener.name(), e))?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn notify_trigger_listeners_complete(
        &self,
        ctx: &Arc<JobExecutionContext>,
        instruction: CompletedExecutionInstruction,
    ) -> SchedulerResult<()> {
        for listener in self.listeners.trigger_listeners() {
            listener
                .trigger_complete(ctx, instruction)
                .map_err(|e| listener_error(listener.name(), e))?;
        }
        Ok(())
    }

    fn notify_job_listeners_to_be_executed(
        &self,
        ctx: &Arc<JobExecutionContext>,
    ) -> SchedulerResult<()> {
        for listener in self.listeners.job_listeners() {
            listener
                .job_to_be_executed(ctx)
                .map_err(|e| listener_error(listener.name(), e))?;
        }
        Ok(())
    }

    fn notify_job_listeners_vetoed(&self, ctx: &Arc<JobExecutionContext>) -> SchedulerResult<()> {
        for listener in self.listeners.job_listeners() {
            listener
                .job_execution_vetoed(ctx)
                .map_err(|e| listener_error(listener.name(), e))?;
        }
        Ok(())
    }

    fn notify_job_listeners_was_executed(
        &self,
        ctx: &Arc<JobExecutionContext>,
        error: Option<&JobExecutionError>,
    ) -> SchedulerResult<()> {
        for listener in self.listeners.job_listeners() {
            listener
                .job_was_executed(ctx, error)
                .map_err(|e| listener_error(listener.name(), e))?;
        }
        Ok(())
    }
}

fn listener_error(name: &str, err: Box<dyn std::error::Error + Send + Sync>) -> SchedulerError {
    SchedulerError::Listener {
        name: name.to_string(),
        message: err.to_string(),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("job panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("job panicked: {msg}")
    } else {
        "job panicked".to_string()
    }
}

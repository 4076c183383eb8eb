//! The background control task: acquire due triggers, wait out their fire
//! times, fire them, and hand the results to the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::SchedulerError;
use crate::listener::ListenerRegistry;
use crate::signaler::Signaler;
use crate::store::{FiredTriggerOutcome, JobStore, StoreError};
use crate::trigger::Trigger;
use crate::worker_pool::WorkerPool;

/// Loop states, driven by the facade over a watch channel. HALTED is
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoopState {
    Paused,
    Running,
    Halted,
}

enum Wake {
    FireTimeReached,
    Signaled,
    StateChanged,
}

pub(crate) struct SchedulingLoop {
    store: Arc<dyn JobStore>,
    pool: Arc<dyn WorkerPool>,
    dispatcher: Arc<Dispatcher>,
    signaler: Arc<Signaler>,
    listeners: Arc<ListenerRegistry>,
    config: SchedulerConfig,
    state_rx: watch::Receiver<LoopState>,
}

impl SchedulingLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        store: Arc<dyn JobStore>,
        pool: Arc<dyn WorkerPool>,
        dispatcher: Arc<Dispatcher>,
        signaler: Arc<Signaler>,
        listeners: Arc<ListenerRegistry>,
        config: SchedulerConfig,
        state_rx: watch::Receiver<LoopState>,
    ) -> JoinHandle<()> {
        let task = Self {
            store,
            pool,
            dispatcher,
            signaler,
            listeners,
            config,
            state_rx,
        };
        tokio::spawn(task.run())
    }

    async fn run(mut self) {
        debug!("scheduling loop started");
        'main: loop {
            // Copy the state out so no watch read guard is held across a
            // wait.
            let state = *self.state_rx.borrow_and_update();
            match state {
                LoopState::Halted => break,
                LoopState::Paused => {
                    if self.state_rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                LoopState::Running => {}
            }

            // Size the batch by what the pool can take right now.
            let available = tokio::select! {
                n = self.pool.block_for_available_workers() => n,
                _ = self.state_rx.changed() => continue 'main,
            };
            if available == 0 {
                // The pool only reports zero once it has shut down.
                break;
            }

            let now = Utc::now();
            let idle_window = chrono_duration(self.config.idle_wait_time);
            let max_count = available.min(self.config.max_batch_size).max(1);
            let batch = match self
                .store
                .acquire_next_triggers(
                    now + idle_window,
                    max_count,
                    chrono_duration(self.config.batch_time_window),
                )
                .await
            {
                Ok(batch) => batch,
                Err(err @ StoreError::Fatal(_)) => {
                    let err = SchedulerError::from(err);
                    self.listeners
                        .notify_scheduler_error("fatal job store failure while acquiring triggers", &err);
                    break;
                }
                Err(err) => {
                    let err = SchedulerError::from(err);
                    self.listeners
                        .notify_scheduler_error("job store failure while acquiring triggers", &err);
                    tokio::select! {
                        _ = sleep(self.config.db_failure_retry_interval) => {}
                        _ = self.state_rx.changed() => {}
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = self.signaler.wait(self.config.idle_wait_time) => {}
                    _ = self.state_rx.changed() => {}
                }
                self.signaler.clear();
                continue;
            }

            // Wait out the delay to the batch's first fire time. A signal
            // reporting an even-sooner candidate releases the whole batch
            // so the sooner trigger can be acquired instead.
            loop {
                let Some(first_fire) = batch.first().and_then(|t| t.next_fire_time()) else {
                    break;
                };
                let now = Utc::now();
                if first_fire <= now {
                    break;
                }
                let delay = (first_fire - now).to_std().unwrap_or(Duration::ZERO);
                let wake = tokio::select! {
                    signaled = self.signaler.wait(delay) => {
                        if signaled { Wake::Signaled } else { Wake::FireTimeReached }
                    }
                    _ = self.state_rx.changed() => Wake::StateChanged,
                };
                match wake {
                    Wake::FireTimeReached => break,
                    Wake::StateChanged => {
                        self.release_batch(&batch).await;
                        continue 'main;
                    }
                    Wake::Signaled => {
                        let earlier_candidate =
                            self.signaler.candidate().is_some_and(|c| c < first_fire);
                        self.signaler.clear();
                        if earlier_candidate {
                            self.release_batch(&batch).await;
                            continue 'main;
                        }
                        // Later or absent candidate: keep waiting.
                    }
                }
            }

            // Only the due slice of the batch fires now. Later fire times
            // in the same acquisition go back to the store and are
            // re-acquired on a following pass, so no trigger ever fires
            // ahead of its own next fire time.
            let due_cutoff = Utc::now() + chrono_duration(self.config.batch_time_window);
            let (due, not_due): (Vec<_>, Vec<_>) = batch
                .into_iter()
                .partition(|t| t.next_fire_time().is_some_and(|next| next <= due_cutoff));
            if !not_due.is_empty() {
                self.release_batch(&not_due).await;
            }
            if due.is_empty() {
                continue;
            }

            let outcomes = match self.store.triggers_fired(&due).await {
                Ok(outcomes) => outcomes,
                Err(err) => {
                    let err = SchedulerError::from(err);
                    self.listeners
                        .notify_scheduler_error("job store failure while firing triggers", &err);
                    self.release_batch(&due).await;
                    continue;
                }
            };

            for (trigger, outcome) in due.iter().zip(outcomes) {
                match outcome {
                    FiredTriggerOutcome::Fired(bundle) => {
                        // Dispatch errors are already reported to listeners.
                        if let Err(err) = Arc::clone(&self.dispatcher).dispatch(*bundle).await {
                            debug!(trigger = %trigger.key(), error = %err, "dispatch failed");
                        }
                    }
                    FiredTriggerOutcome::NoFire => {}
                    FiredTriggerOutcome::Error(err) => {
                        let err = SchedulerError::from(err);
                        self.listeners.notify_scheduler_error(
                            &format!("trigger {} could not be fired", trigger.key()),
                            &err,
                        );
                        if let Err(release_err) =
                            self.store.release_acquired_trigger(trigger.as_ref()).await
                        {
                            warn!(
                                trigger = %trigger.key(),
                                error = %release_err,
                                "failed to release unfired trigger"
                            );
                        }
                    }
                }
            }
        }
        debug!("scheduling loop halted");
    }

    async fn release_batch(&self, batch: &[Box<dyn Trigger>]) {
        for trigger in batch {
            if let Err(err) = self.store.release_acquired_trigger(trigger.as_ref()).await {
                warn!(trigger = %trigger.key(), error = %err, "failed to release acquired trigger");
            }
        }
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX))
}

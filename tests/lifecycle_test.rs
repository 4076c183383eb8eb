//! Lifecycle, listener, and concurrency properties of the scheduler:
//! shutdown semantics, veto handling, execution uniqueness, stateful
//! non-overlap, and the process-wide repository.

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serial_test::serial;

use cadence::{
    JobDetail, JobExecutionContext, JobKey, ListenerResult, Scheduler, SchedulerConfig,
    SchedulerError, SchedulerRepository, SimpleTrigger, TriggerKey, TriggerListener,
    TriggerState, REPEAT_INDEFINITELY,
};

use support::{CountingJob, Event, SlowJob, test_scheduler, wait_until};

#[tokio::test]
async fn shutdown_is_idempotent_and_final() -> Result<()> {
    let t = test_scheduler("lifecycle-idempotent", 1, SchedulerConfig::default());
    t.factory.register("counting", Arc::new(CountingJob::default()) as _);
    t.scheduler.start().await?;

    t.scheduler.shutdown(true).await?;
    t.scheduler.shutdown(true).await?;
    t.scheduler.shutdown(false).await?;

    assert_eq!(t.recorder.count(|e| *e == Event::Shutdown), 1);
    assert_eq!(t.recorder.count(|e| *e == Event::ShuttingDown), 1);

    // The one-way door: no operation is accepted afterwards.
    let err = t
        .scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("late", None), "counting"),
            Box::new(SimpleTrigger::new(TriggerKey::new("late", None), Utc::now())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Shutdown));
    Ok(())
}

#[tokio::test]
async fn shutdown_with_wait_drains_executions() -> Result<()> {
    let t = test_scheduler("lifecycle-drain", 2, SchedulerConfig::default());
    let job = Arc::new(SlowJob::new(Duration::from_millis(300)));
    t.factory.register("slow", Arc::clone(&job) as _);

    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("a", None), "slow"),
            Box::new(SimpleTrigger::new(TriggerKey::new("t1", None), Utc::now())),
        )
        .await?;
    t.scheduler.start().await?;

    assert!(
        wait_until(Duration::from_secs(3), || {
            job.running.load(Ordering::SeqCst) > 0
        })
        .await,
        "job never started"
    );

    t.scheduler.shutdown(true).await?;
    assert_eq!(job.completed.load(Ordering::SeqCst), 1);
    assert!(t.scheduler.currently_executing_jobs().is_empty());

    // No further listener events once shutdown has returned.
    let settled = t.recorder.events().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(t.recorder.events().len(), settled);
    Ok(())
}

#[tokio::test]
async fn standby_stops_firing_until_restarted() -> Result<()> {
    let t = test_scheduler("lifecycle-standby", 1, SchedulerConfig::default());
    let job = Arc::new(CountingJob::default());
    t.factory.register("counting", Arc::clone(&job) as _);

    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("a", None), "counting"),
            Box::new(
                SimpleTrigger::new(TriggerKey::new("t1", None), Utc::now())
                    .with_repeat(REPEAT_INDEFINITELY, Duration::from_millis(100)),
            ),
        )
        .await?;
    t.scheduler.start().await?;
    assert!(wait_until(Duration::from_secs(3), || job.runs.load(Ordering::SeqCst) >= 1).await);

    t.scheduler.standby()?;
    assert!(t.scheduler.in_standby_mode());
    assert!(!t.scheduler.is_started());
    tokio::time::sleep(Duration::from_millis(200)).await;
    let during_standby = job.runs.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(job.runs.load(Ordering::SeqCst), during_standby);

    t.scheduler.start().await?;
    assert!(t.scheduler.is_started());
    assert!(
        wait_until(Duration::from_secs(2), || {
            job.runs.load(Ordering::SeqCst) > during_standby
        })
        .await,
        "firing did not resume after standby"
    );

    t.scheduler.shutdown(true).await?;
    Ok(())
}

#[tokio::test]
async fn start_delayed_defers_the_first_fire() -> Result<()> {
    let t = test_scheduler("lifecycle-delayed", 1, SchedulerConfig::default());
    let job = Arc::new(CountingJob::default());
    t.factory.register("counting", Arc::clone(&job) as _);

    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("a", None), "counting"),
            Box::new(SimpleTrigger::new(TriggerKey::new("t1", None), Utc::now())),
        )
        .await?;

    t.scheduler.start_delayed(Duration::from_millis(250));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!t.scheduler.is_started());
    assert_eq!(job.runs.load(Ordering::SeqCst), 0);

    assert!(
        wait_until(Duration::from_secs(3), || job.runs.load(Ordering::SeqCst) == 1).await,
        "delayed start never fired the due trigger"
    );
    t.scheduler.shutdown(true).await?;
    Ok(())
}

/// Scheduling with a `None` group is indistinguishable from naming
/// "DEFAULT" outright.
#[tokio::test]
async fn default_group_canonicalisation() -> Result<()> {
    let t = test_scheduler("lifecycle-groups", 1, SchedulerConfig::default());
    t.factory.register("counting", Arc::new(CountingJob::default()) as _);

    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("a", None), "counting"),
            Box::new(SimpleTrigger::new(
                TriggerKey::new("t1", None),
                Utc::now() + chrono::Duration::hours(1),
            )),
        )
        .await?;

    assert!(t.scheduler.get_job_detail("a", Some("DEFAULT")).await?.is_some());
    assert!(t.scheduler.get_trigger("t1", Some("DEFAULT")).await?.is_some());
    assert_eq!(
        t.scheduler.get_trigger_state("t1", None).await?,
        TriggerState::Normal
    );
    assert_eq!(t.scheduler.get_job_keys("DEFAULT").await?.len(), 1);

    t.scheduler.shutdown(false).await?;
    Ok(())
}

/// Every fire of a run gets a distinct fire instance id.
#[tokio::test]
async fn fire_instance_ids_are_unique() -> Result<()> {
    let t = test_scheduler("lifecycle-fire-ids", 2, SchedulerConfig::default());
    let job = Arc::new(CountingJob::default());
    t.factory.register("counting", Arc::clone(&job) as _);

    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("a", None), "counting"),
            Box::new(
                SimpleTrigger::new(TriggerKey::new("t1", None), Utc::now())
                    .with_repeat(5, Duration::from_millis(100)),
            ),
        )
        .await?;
    t.scheduler.start().await?;

    assert!(
        wait_until(Duration::from_secs(5), || job.runs.load(Ordering::SeqCst) == 6).await,
        "expected six fires, saw {}",
        job.runs.load(Ordering::SeqCst)
    );
    let ids = t.recorder.fire_instance_ids();
    assert_eq!(ids.len(), 6);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 6);

    t.scheduler.shutdown(true).await?;
    Ok(())
}

/// A trigger-listener veto suppresses the job body and delivers
/// `job_execution_vetoed` exactly once.
#[tokio::test]
async fn veto_suppresses_execution() -> Result<()> {
    struct VetoAll;

    impl TriggerListener for VetoAll {
        fn name(&self) -> &str {
            "veto-all"
        }

        fn veto_job_execution(
            &self,
            _ctx: &Arc<JobExecutionContext>,
        ) -> std::result::Result<bool, Box<dyn std::error::Error + Send + Sync>> {
            Ok(true)
        }
    }

    let t = test_scheduler("lifecycle-veto", 1, SchedulerConfig::default());
    let job = Arc::new(CountingJob::default());
    t.factory.register("counting", Arc::clone(&job) as _);
    t.scheduler.listeners().add_trigger_listener(Arc::new(VetoAll))?;

    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("a", None), "counting"),
            Box::new(SimpleTrigger::new(TriggerKey::new("t1", None), Utc::now())),
        )
        .await?;
    t.scheduler.start().await?;

    assert!(
        wait_until(Duration::from_secs(3), || {
            t.recorder.count(|e| *e == Event::ExecutionVetoed("a".into())) == 1
        })
        .await,
        "veto notification never arrived"
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    assert_eq!(t.recorder.count(|e| *e == Event::ExecutionVetoed("a".into())), 1);
    assert_eq!(t.recorder.count(|e| matches!(e, Event::ToBeExecuted(_))), 0);

    t.scheduler.shutdown(true).await?;
    Ok(())
}

/// A failing trigger listener surfaces as a scheduler error and marks the
/// trigger ERROR instead of crashing the loop.
#[tokio::test]
async fn listener_failure_records_trigger_error() -> Result<()> {
    struct Failing;

    impl TriggerListener for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn trigger_fired(&self, _ctx: &Arc<JobExecutionContext>) -> ListenerResult {
            Err("listener exploded".into())
        }
    }

    let t = test_scheduler("lifecycle-listener-error", 1, SchedulerConfig::default());
    let job = Arc::new(CountingJob::default());
    t.factory.register("counting", Arc::clone(&job) as _);
    t.scheduler.listeners().add_trigger_listener(Arc::new(Failing))?;

    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("a", None), "counting"),
            Box::new(SimpleTrigger::new(TriggerKey::new("t1", None), Utc::now())),
        )
        .await?;
    t.scheduler.start().await?;

    assert!(
        wait_until(Duration::from_secs(3), || {
            t.recorder.count(|e| matches!(e, Event::SchedulerError(_))) >= 1
        })
        .await,
        "scheduler error event never arrived"
    );
    assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    // The ERROR state lands after the completion round-trip.
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    loop {
        if t.scheduler.get_trigger_state("t1", None).await? == TriggerState::Error {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "trigger never reached the ERROR state"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    t.scheduler.shutdown(true).await?;
    Ok(())
}

/// Property 2: a stateful job never overlaps itself, even with spare
/// workers and several triggers.
#[tokio::test]
async fn stateful_job_never_overlaps() -> Result<()> {
    let t = test_scheduler(
        "lifecycle-stateful",
        4,
        SchedulerConfig {
            max_batch_size: 4,
            ..SchedulerConfig::default()
        },
    );
    let job = Arc::new(SlowJob::new(Duration::from_millis(120)));
    t.factory.register("slow", Arc::clone(&job) as _);

    let detail = JobDetail::new(JobKey::new("a", None), "slow").stateful(true);
    t.scheduler
        .schedule_job(
            detail,
            Box::new(SimpleTrigger::new(TriggerKey::new("t1", None), Utc::now())),
        )
        .await?;
    t.scheduler
        .schedule_trigger(Box::new(
            SimpleTrigger::new(TriggerKey::new("t2", None), Utc::now())
                .with_job_key(JobKey::new("a", None)),
        ))
        .await?;
    t.scheduler.start().await?;

    assert!(
        wait_until(Duration::from_secs(5), || {
            job.completed.load(Ordering::SeqCst) >= 2
        })
        .await,
        "both triggers should eventually run the job"
    );
    assert_eq!(job.peak.load(Ordering::SeqCst), 1, "stateful job overlapped");

    t.scheduler.shutdown(true).await?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn repository_tracks_scheduler_lifetimes() -> Result<()> {
    let t = test_scheduler("repository-main", 1, SchedulerConfig::default());

    let found = SchedulerRepository::lookup("repository-main").expect("scheduler not registered");
    assert_eq!(found.name(), "repository-main");

    // A second scheduler under the same name is refused.
    let store = Arc::new(cadence::MemoryJobStore::new());
    let duplicate = Scheduler::new(
        "repository-main",
        SchedulerConfig::default(),
        store as _,
        Arc::new(cadence::TokioWorkerPool::new(1)) as _,
        Arc::new(cadence::SimpleJobFactory::new()) as _,
    );
    assert!(matches!(
        duplicate.unwrap_err(),
        SchedulerError::DuplicateScheduler(_)
    ));

    t.scheduler.shutdown(false).await?;
    assert!(SchedulerRepository::lookup("repository-main").is_none());
    Ok(())
}

/// Deleting a job unschedules its triggers first and reports whether
/// anything was removed.
#[tokio::test]
async fn delete_job_removes_triggers_and_job() -> Result<()> {
    let t = test_scheduler("lifecycle-delete", 1, SchedulerConfig::default());
    t.factory.register("counting", Arc::new(CountingJob::default()) as _);

    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("a", None), "counting").durable(true),
            Box::new(SimpleTrigger::new(
                TriggerKey::new("t1", None),
                Utc::now() + chrono::Duration::hours(1),
            )),
        )
        .await?;
    t.scheduler
        .schedule_trigger(Box::new(
            SimpleTrigger::new(
                TriggerKey::new("t2", None),
                Utc::now() + chrono::Duration::hours(1),
            )
            .with_job_key(JobKey::new("a", None)),
        ))
        .await?;

    assert!(t.scheduler.delete_job("a", None).await?);
    assert!(t.scheduler.get_job_detail("a", None).await?.is_none());
    assert!(t.scheduler.get_trigger("t1", None).await?.is_none());
    assert!(t.scheduler.get_trigger("t2", None).await?.is_none());
    assert!(!t.scheduler.delete_job("a", None).await?);

    let deleted = t.recorder.position(|e| *e == Event::JobDeleted("a".into()));
    assert!(deleted.is_some());

    t.scheduler.shutdown(false).await?;
    Ok(())
}

/// Unscheduling the only trigger of a non-durable job removes the job;
/// a durable job stays.
#[tokio::test]
async fn unschedule_respects_durability() -> Result<()> {
    let t = test_scheduler("lifecycle-durable", 1, SchedulerConfig::default());
    t.factory.register("counting", Arc::new(CountingJob::default()) as _);

    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("volatile", None), "counting"),
            Box::new(SimpleTrigger::new(
                TriggerKey::new("tv", None),
                Utc::now() + chrono::Duration::hours(1),
            )),
        )
        .await?;
    t.scheduler
        .schedule_job(
            JobDetail::new(JobKey::new("durable", None), "counting").durable(true),
            Box::new(SimpleTrigger::new(
                TriggerKey::new("td", None),
                Utc::now() + chrono::Duration::hours(1),
            )),
        )
        .await?;

    assert!(t.scheduler.unschedule_job("tv", None).await?);
    assert!(t.scheduler.get_job_detail("volatile", None).await?.is_none());

    assert!(t.scheduler.unschedule_job("td", None).await?);
    assert!(t.scheduler.get_job_detail("durable", None).await?.is_some());

    assert!(!t.scheduler.unschedule_job("missing", None).await?);

    t.scheduler.shutdown(false).await?;
    Ok(())
}

/// `add_job` refuses a non-durable job without a trigger unless it is a
/// replacement.
#[tokio::test]
async fn add_job_requires_durability_or_replacement() -> Result<()> {
    let t = test_scheduler("lifecycle-addjob", 1, SchedulerConfig::default());
    t.factory.register("counting", Arc::new(CountingJob::default()) as _);

    let err = t
        .scheduler
        .add_job(JobDetail::new(JobKey::new("a", None), "counting"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NonDurableWithoutTrigger(_)));

    t.scheduler
        .add_job(
            JobDetail::new(JobKey::new("a", None), "counting").durable(true),
            false,
        )
        .await?;
    assert!(t.scheduler.get_job_detail("a", None).await?.is_some());

    t.scheduler.shutdown(false).await?;
    Ok(())
}

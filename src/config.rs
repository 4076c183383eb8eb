//! Scheduler configuration loaded from environment variables.

use std::time::Duration;

/// Knobs recognised by the scheduling core. Every field has a default;
/// `from_env` overrides them from `CADENCE_*` environment variables.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long the loop sleeps when no trigger is due.
    pub idle_wait_time: Duration,

    /// Back-off between retries after a transient store failure.
    pub db_failure_retry_interval: Duration,

    /// When false, facade mutations do not wake the loop; changes are
    /// discovered at the next idle-wait expiry.
    pub signal_on_scheduling_change: bool,

    /// Interrupt interruptible jobs on any shutdown.
    pub interrupt_jobs_on_shutdown: bool,

    /// Interrupt interruptible jobs on `shutdown(wait = true)`.
    pub interrupt_jobs_on_shutdown_with_wait: bool,

    /// Upper bound on triggers acquired per loop pass; the effective batch
    /// is also capped by the free worker count.
    pub max_batch_size: usize,

    /// Extra window past "due now" a batch acquisition may reach into.
    pub batch_time_window: Duration,

    /// Workers in the default pool.
    pub worker_pool_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_wait_time: Duration::from_secs(30),
            db_failure_retry_interval: Duration::from_secs(15),
            signal_on_scheduling_change: true,
            interrupt_jobs_on_shutdown: false,
            interrupt_jobs_on_shutdown_with_wait: false,
            max_batch_size: 1,
            batch_time_window: Duration::ZERO,
            worker_pool_size: num_cpus::get().max(1),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            idle_wait_time: env_millis("CADENCE_IDLE_WAIT_MS").unwrap_or(defaults.idle_wait_time),
            db_failure_retry_interval: env_millis("CADENCE_DB_FAILURE_RETRY_MS")
                .unwrap_or(defaults.db_failure_retry_interval),
            signal_on_scheduling_change: env_bool("CADENCE_SIGNAL_ON_SCHEDULING_CHANGE")
                .unwrap_or(defaults.signal_on_scheduling_change),
            interrupt_jobs_on_shutdown: env_bool("CADENCE_INTERRUPT_JOBS_ON_SHUTDOWN")
                .unwrap_or(defaults.interrupt_jobs_on_shutdown),
            interrupt_jobs_on_shutdown_with_wait: env_bool(
                "CADENCE_INTERRUPT_JOBS_ON_SHUTDOWN_WITH_WAIT",
            )
            .unwrap_or(defaults.interrupt_jobs_on_shutdown_with_wait),
            max_batch_size: env_parse("CADENCE_MAX_BATCH_SIZE")
                .filter(|n| *n >= 1)
                .unwrap_or(defaults.max_batch_size),
            batch_time_window: env_millis("CADENCE_BATCH_TIME_WINDOW_MS")
                .unwrap_or(defaults.batch_time_window),
            worker_pool_size: env_parse("CADENCE_WORKER_POOL_SIZE")
                .filter(|n| *n >= 1)
                .unwrap_or(defaults.worker_pool_size),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.trim(), "1" | "true" | "TRUE" | "yes"))
}

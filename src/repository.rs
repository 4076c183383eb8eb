//! Process-wide registry of named scheduler instances.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::Scheduler;

static SCHEDULERS: Lazy<Mutex<HashMap<String, Scheduler>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Registry keyed by scheduler name. Entries are added at construction
/// and removed when the scheduler shuts down; host integrations use
/// [`SchedulerRepository::lookup`] to find a running instance.
pub struct SchedulerRepository;

impl SchedulerRepository {
    pub(crate) fn bind(scheduler: Scheduler) -> SchedulerResult<()> {
        let mut schedulers = SCHEDULERS.lock().expect("scheduler repository poisoned");
        let name = scheduler.name().to_string();
        if schedulers.contains_key(&name) {
            return Err(SchedulerError::DuplicateScheduler(name));
        }
        schedulers.insert(name, scheduler);
        Ok(())
    }

    pub fn lookup(name: &str) -> Option<Scheduler> {
        SCHEDULERS
            .lock()
            .expect("scheduler repository poisoned")
            .get(name)
            .cloned()
    }

    pub fn lookup_all() -> Vec<Scheduler> {
        SCHEDULERS
            .lock()
            .expect("scheduler repository poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn remove(name: &str) -> bool {
        SCHEDULERS
            .lock()
            .expect("scheduler repository poisoned")
            .remove(name)
            .is_some()
    }
}

//! Cross-task wake-up shared by the facade and the scheduling loop.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::sleep;

/// Carries a nullable "earliest candidate next fire time" from any caller
/// to the scheduling loop. When the loop is waiting with an intended
/// wake-up later than the candidate, the signal shortens its wait.
#[derive(Default)]
pub struct Signaler {
    candidate: Mutex<SignalState>,
    notify: Notify,
}

#[derive(Default)]
struct SignalState {
    signaled: bool,
    earliest_candidate: Option<DateTime<Utc>>,
}

impl Signaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that scheduling state changed, safe from any caller. The
    /// earliest candidate across un-consumed signals is retained.
    pub fn signal_scheduling_change(&self, candidate: Option<DateTime<Utc>>) {
        {
            let mut state = self.candidate.lock().expect("signal state poisoned");
            state.signaled = true;
            state.earliest_candidate = match (state.earliest_candidate, candidate) {
                (Some(existing), Some(new)) => Some(existing.min(new)),
                (existing, new) => existing.or(new),
            };
        }
        self.notify.notify_one();
    }

    pub fn is_signaled(&self) -> bool {
        self.candidate.lock().expect("signal state poisoned").signaled
    }

    pub fn candidate(&self) -> Option<DateTime<Utc>> {
        self.candidate
            .lock()
            .expect("signal state poisoned")
            .earliest_candidate
    }

    pub fn clear(&self) {
        let mut state = self.candidate.lock().expect("signal state poisoned");
        state.signaled = false;
        state.earliest_candidate = None;
    }

    /// Wait up to `max` for a signal. Returns true if woken by a signal,
    /// false if the full duration elapsed. Loop-side only.
    pub async fn wait(&self, max: Duration) -> bool {
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = sleep(max) => false,
        }
    }

    /// Future resolving on the next signal, for composing into a larger
    /// `select!`.
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_shortens_wait() {
        let signaler = std::sync::Arc::new(Signaler::new());
        let other = std::sync::Arc::clone(&signaler);
        let started = std::time::Instant::now();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            other.signal_scheduling_change(Some(Utc::now()));
        });
        let signaled = signaler.wait(Duration::from_secs(10)).await;
        assert!(signaled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn earliest_candidate_wins() {
        let signaler = Signaler::new();
        let now = Utc::now();
        signaler.signal_scheduling_change(Some(now + chrono::Duration::seconds(30)));
        signaler.signal_scheduling_change(Some(now + chrono::Duration::seconds(5)));
        signaler.signal_scheduling_change(None);
        assert_eq!(signaler.candidate(), Some(now + chrono::Duration::seconds(5)));
        signaler.clear();
        assert!(!signaler.is_signaled());
        assert_eq!(signaler.candidate(), None);
    }
}

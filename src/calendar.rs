//! Time-domain exclusion filters consulted when computing fire times.

use chrono::{DateTime, Utc};

/// Predicate on time: a calendar excludes windows from firing. Triggers
/// step over excluded times when computing their schedule.
pub trait Calendar: Send + Sync {
    fn is_time_included(&self, time: DateTime<Utc>) -> bool;

    fn clone_box(&self) -> Box<dyn Calendar>;
}

impl Clone for Box<dyn Calendar> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Calendar excluding a set of half-open `[start, end)` time ranges.
#[derive(Clone, Debug, Default)]
pub struct BlackoutCalendar {
    ranges: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

impl BlackoutCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blackout(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.ranges.push((start, end));
        self
    }
}

impl Calendar for BlackoutCalendar {
    fn is_time_included(&self, time: DateTime<Utc>) -> bool {
        !self
            .ranges
            .iter()
            .any(|(start, end)| time >= *start && time < *end)
    }

    fn clone_box(&self) -> Box<dyn Calendar> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blackout_ranges_are_half_open() {
        let start = Utc::now();
        let end = start + chrono::Duration::minutes(10);
        let cal = BlackoutCalendar::new().with_blackout(start, end);
        assert!(!cal.is_time_included(start));
        assert!(!cal.is_time_included(start + chrono::Duration::minutes(5)));
        assert!(cal.is_time_included(end));
        assert!(cal.is_time_included(start - chrono::Duration::seconds(1)));
    }
}

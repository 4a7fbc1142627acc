use chrono::{DateTime, Days, NaiveDate, Utc};
use dashmap::DashMap;

/// Days of violation history kept by [`ViolationLog::prune`].
const RETAINED_DAYS: u64 = 7;

/// Daily count of throttle denials per scope.
///
/// Purely observational: counts never feed back into throttle decisions.
#[derive(Debug, Default)]
pub struct ViolationLog {
    counts: DashMap<(String, NaiveDate), u64>,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one denial for `scope` on the day of `at`; returns the new
    /// total for that day.
    pub fn record(&self, scope: &str, at: DateTime<Utc>) -> u64 {
        let mut count = self
            .counts
            .entry((scope.to_string(), at.date_naive()))
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn count(&self, scope: &str, day: NaiveDate) -> u64 {
        self.counts
            .get(&(scope.to_string(), day))
            .map_or(0, |count| *count)
    }

    /// Denials per scope on `day`, sorted by scope name.
    pub fn for_day(&self, day: NaiveDate) -> Vec<(String, u64)> {
        let mut totals: Vec<_> = self
            .counts
            .iter()
            .filter(|entry| entry.key().1 == day)
            .map(|entry| (entry.key().0.clone(), *entry.value()))
            .collect();
        totals.sort();
        totals
    }

    /// Drop counters older than the retention window relative to `now`.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.date_naive().checked_sub_days(Days::new(RETAINED_DAYS)) else {
            return 0;
        };
        let before = self.counts.len();
        self.counts.retain(|(_, day), _| *day > cutoff);
        before - self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn counts_are_per_scope_and_day() {
        let log = ViolationLog::new();
        let now = Utc::now();

        assert_eq!(log.record("borrow", now), 1);
        assert_eq!(log.record("borrow", now), 2);
        assert_eq!(log.record("search", now), 1);
        assert_eq!(log.record("borrow", now + Duration::days(1)), 1);

        assert_eq!(log.count("borrow", now.date_naive()), 2);
        assert_eq!(
            log.for_day(now.date_naive()),
            vec![("borrow".to_string(), 2), ("search".to_string(), 1)]
        );
    }

    #[test]
    fn prune_drops_old_days() {
        let log = ViolationLog::new();
        let now = Utc::now();
        log.record("borrow", now - Duration::days(10));
        log.record("borrow", now);

        assert_eq!(log.prune(now), 1);
        assert_eq!(log.count("borrow", now.date_naive()), 1);
    }
}

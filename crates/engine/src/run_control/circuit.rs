//! Consecutive-failure circuit breaker over run history.

use crate::models::{HistoryStatus, RunHistoryEntry};

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreaker {
    max_consecutive_errors: usize,
}

impl CircuitBreaker {
    pub fn new(max_consecutive_errors: usize) -> Self {
        Self { max_consecutive_errors }
    }

    /// How many history entries [`CircuitBreaker::trips`] wants, newest
    /// first. One more than the threshold, since the newest entry may be the
    /// run being admitted.
    pub fn history_needed(&self) -> usize {
        self.max_consecutive_errors + 1
    }

    /// Whether the newest entries are all errors.
    ///
    /// `recent` is newest first. A leading `Started` entry is the run being
    /// admitted and is ignored. With fewer entries than the threshold left,
    /// the breaker never trips.
    pub fn trips(&self, recent: &[RunHistoryEntry]) -> bool {
        let mut statuses: Vec<HistoryStatus> = recent
            .iter()
            .take(self.history_needed())
            .map(|e| e.status)
            .collect();
        if statuses.first() == Some(&HistoryStatus::Started) {
            statuses.remove(0);
        }
        statuses.truncate(self.max_consecutive_errors);

        statuses.len() >= self.max_consecutive_errors
            && statuses.iter().all(|s| *s == HistoryStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn history(statuses: &[HistoryStatus]) -> Vec<RunHistoryEntry> {
        let workflow_id = Uuid::new_v4();
        statuses
            .iter()
            .map(|status| {
                let mut entry = RunHistoryEntry::started(workflow_id, false);
                entry.status = *status;
                entry
            })
            .collect()
    }

    #[test]
    fn trips_at_threshold() {
        use HistoryStatus::*;
        let breaker = CircuitBreaker::new(3);

        assert!(!breaker.trips(&history(&[Error, Error])));
        assert!(breaker.trips(&history(&[Error, Error, Error])));
        assert!(breaker.trips(&history(&[Started, Error, Error, Error])));
        assert!(!breaker.trips(&history(&[Started, Error, Error])));
    }

    #[test]
    fn a_success_resets_the_count() {
        use HistoryStatus::*;
        let breaker = CircuitBreaker::new(3);
        assert!(!breaker.trips(&history(&[Error, Error, Success, Error, Error])));
        assert!(!breaker.trips(&history(&[Started, Error, Success, Error])));
    }
}

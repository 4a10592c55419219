//! Sliding-window rate limiting per workflow.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::models::WorkflowId;

/// Remembers the start times of recent runs, per workflow.
///
/// The read-modify-write of one workflow's window happens under that
/// entry's shard lock, so concurrent admissions cannot both take the last
/// slot.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_runs: usize,
    starts: DashMap<WorkflowId, VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_runs: usize) -> Self {
        Self {
            window,
            max_runs,
            starts: DashMap::new(),
        }
    }

    /// Record a start at `now` unless the window is full.
    pub fn try_acquire(&self, workflow_id: WorkflowId, now: DateTime<Utc>) -> bool {
        let window_start = now - self.window;
        let mut starts = self.starts.entry(workflow_id).or_default();

        while starts.front().is_some_and(|at| *at <= window_start) {
            starts.pop_front();
        }
        if starts.len() >= self.max_runs {
            return false;
        }
        starts.push_back(now);
        true
    }

    /// Starts currently counted against `workflow_id`.
    pub fn in_window(&self, workflow_id: WorkflowId) -> usize {
        self.starts.get(&workflow_id).map_or(0, |s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn fourth_start_in_window_is_refused() {
        let limiter = RateLimiter::new(Duration::seconds(60), 3);
        let id = Uuid::new_v4();
        let now = Utc::now();

        assert!(limiter.try_acquire(id, now));
        assert!(limiter.try_acquire(id, now + Duration::seconds(1)));
        assert!(limiter.try_acquire(id, now + Duration::seconds(2)));
        assert!(!limiter.try_acquire(id, now + Duration::seconds(3)));
        assert_eq!(limiter.in_window(id), 3);

        // A refused start does not count.
        assert!(limiter.try_acquire(id, now + Duration::seconds(61)));
    }

    #[test]
    fn workflows_have_separate_windows() {
        let limiter = RateLimiter::new(Duration::seconds(60), 1);
        let now = Utc::now();
        assert!(limiter.try_acquire(Uuid::new_v4(), now));
        assert!(limiter.try_acquire(Uuid::new_v4(), now));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_never_exceed_the_limit() {
        let limiter = Arc::new(RateLimiter::new(Duration::seconds(60), 5));
        let id = Uuid::new_v4();
        let now = Utc::now();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.try_acquire(id, now) })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(limiter.in_window(id), 5);
    }
}

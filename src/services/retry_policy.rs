//! Bounded retries around backend calls.
//!
//! Both profile flows (initial fetch, re-fetch after create) go through
//! [`RetryPolicy::run`]; they differ only in attempt count, delay schedule and
//! whether "no such record" is worth asking again.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelaySchedule {
    /// `unit * n` before the n-th retry.
    Linear(Duration),
    /// Explicit delays; the last one repeats if there are more retries.
    Fixed(Vec<Duration>),
}

impl DelaySchedule {
    /// Delay before retry number `retry` (1-based).
    pub fn before_retry(&self, retry: usize) -> Duration {
        match self {
            DelaySchedule::Linear(unit) => *unit * retry as u32,
            DelaySchedule::Fixed(delays) => delays
                .get(retry.saturating_sub(1))
                .or_else(|| delays.last())
                .copied()
                .unwrap_or(Duration::ZERO),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub schedule: DelaySchedule,
    /// When false a `NotFound` answer ends the run immediately.
    pub retry_not_found: bool,
}

/// What a run did, for callers and for logs.
#[derive(Debug)]
pub struct RetryReport<T> {
    pub result: Result<T, BackendError>,
    pub attempts: usize,
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Three attempts, waiting one unit then two. "Not found" is an answer.
    pub fn profile_fetch(unit: Duration) -> Self {
        Self {
            max_attempts: 3,
            schedule: DelaySchedule::Linear(unit),
            retry_not_found: false,
        }
    }

    /// One immediate attempt and one more after `delay`. A fresh insert may
    /// not be readable yet, so "not found" is retried too.
    pub fn after_create(delay: Duration) -> Self {
        Self {
            max_attempts: 2,
            schedule: DelaySchedule::Fixed(vec![delay]),
            retry_not_found: true,
        }
    }

    fn should_retry(&self, err: &BackendError) -> bool {
        if err.is_not_found() {
            return self.retry_not_found;
        }
        // Rejected credentials will not heal by waiting.
        !err.is_unauthorized()
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> RetryReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delays = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(label, attempt, "backend call");
            let err = match op().await {
                Ok(value) => {
                    return RetryReport {
                        result: Ok(value),
                        attempts: attempt,
                        delays,
                    }
                }
                Err(err) => err,
            };

            if attempt >= max_attempts || !self.should_retry(&err) {
                warn!(label, attempt, error = %err, "giving up");
                return RetryReport {
                    result: Err(err),
                    attempts: attempt,
                    delays,
                };
            }

            let delay = self.schedule.before_retry(attempt);
            warn!(label, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            delays.push(delay);
        }
    }
}

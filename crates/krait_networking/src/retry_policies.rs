//! The retry policies used when downloading artifacts.
//!
//! This module re-exports the `retry-policies` crate so the rest of the
//! workspace has a single place to get them from, and adds the policies the
//! crate does not ship.

pub use retry_policies::{policies::*, Jitter, RetryDecision, RetryPolicy};

use std::time::{Duration, SystemTime};

/// A policy that never retries.
#[derive(Debug, Default, Copy, Clone)]
pub struct DoNotRetryPolicy;

impl RetryPolicy for DoNotRetryPolicy {
    fn should_retry(&self, _request_start_time: SystemTime, _n_past_retries: u32) -> RetryDecision {
        RetryDecision::DoNotRetry
    }
}

/// The default retry policy for package downloads: exponential backoff with
/// three retries.
pub fn default_retry_policy() -> ExponentialBackoff {
    ExponentialBackoff::builder()
        .retry_bounds(Duration::from_millis(250), Duration::from_secs(30))
        .build_with_max_retries(3)
}

#[cfg(test)]
mod test {
    use std::time::SystemTime;

    use super::{default_retry_policy, DoNotRetryPolicy, RetryDecision, RetryPolicy};

    #[test]
    fn do_not_retry_never_retries() {
        assert!(matches!(
            DoNotRetryPolicy.should_retry(SystemTime::now(), 0),
            RetryDecision::DoNotRetry
        ));
    }

    #[test]
    fn default_policy_retries_a_few_times() {
        let policy = default_retry_policy();
        assert!(matches!(
            policy.should_retry(SystemTime::now(), 0),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(SystemTime::now(), 3),
            RetryDecision::DoNotRetry
        ));
    }
}

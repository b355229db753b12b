//! Retry backoff policy for failed jobs.
//!
//! Pure delay computation; the atomic reschedule itself happens inside the
//! store's `fail_attempt` so the attempts read and the state write share one
//! transaction.

use super::models::DEFAULT_BACKOFF_BASE;

/// Exponential backoff with a configurable base and no upper cap.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base of the exponential growth. Values `<= 1` are allowed and yield
    /// non-increasing delays (base 1 waits a constant second, base 0 makes
    /// the job eligible again immediately).
    pub backoff_base: f64,
}

impl BackoffPolicy {
    pub fn new(backoff_base: f64) -> Self {
        Self { backoff_base }
    }

    /// Delay in whole seconds before the given attempt count may run again:
    /// `floor(backoff_base ^ attempts)`.
    ///
    /// `attempts` is the count *including* the failure being scheduled, so
    /// the first retry of a base-2 policy waits 2 seconds, the second 4.
    pub fn delay_secs(&self, attempts: i64) -> i64 {
        self.backoff_base.powi(attempts as i32) as i64
    }

    /// The unix timestamp at which a job failing its `attempts`-th run
    /// becomes eligible again.
    pub fn next_eligible_at(&self, now: i64, attempts: i64) -> i64 {
        now + self.delay_secs(attempts)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_is_two() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.backoff_base, 2.0);
    }

    #[test]
    fn test_delays_double_with_base_two() {
        let policy = BackoffPolicy::new(2.0);

        // attempts=1: 2^1 = 2
        assert_eq!(policy.delay_secs(1), 2);

        // attempts=2: 2^2 = 4
        assert_eq!(policy.delay_secs(2), 4);

        // attempts=3: 2^3 = 8
        assert_eq!(policy.delay_secs(3), 8);

        // attempts=10: 2^10 = 1024
        assert_eq!(policy.delay_secs(10), 1024);
    }

    #[test]
    fn test_delays_strictly_increase_for_base_above_one() {
        let policy = BackoffPolicy::new(1.5);

        let mut previous = 0;
        for attempts in 2..10 {
            let delay = policy.delay_secs(attempts);
            assert!(
                delay > previous,
                "delay for attempts={} was {} (previous {})",
                attempts,
                delay,
                previous
            );
            previous = delay;
        }
    }

    #[test]
    fn test_fractional_base_truncates() {
        let policy = BackoffPolicy::new(1.5);

        // 1.5^2 = 2.25 -> 2
        assert_eq!(policy.delay_secs(2), 2);

        // 1.5^3 = 3.375 -> 3
        assert_eq!(policy.delay_secs(3), 3);
    }

    #[test]
    fn test_base_one_is_constant() {
        let policy = BackoffPolicy::new(1.0);

        assert_eq!(policy.delay_secs(1), 1);
        assert_eq!(policy.delay_secs(5), 1);
        assert_eq!(policy.delay_secs(50), 1);
    }

    #[test]
    fn test_base_zero_is_immediate() {
        let policy = BackoffPolicy::new(0.0);

        assert_eq!(policy.delay_secs(1), 0);
        assert_eq!(policy.delay_secs(3), 0);
    }

    #[test]
    fn test_next_eligible_at_offsets_from_now() {
        let policy = BackoffPolicy::new(2.0);

        assert_eq!(policy.next_eligible_at(1_000, 1), 1_002);
        assert_eq!(policy.next_eligible_at(1_000, 2), 1_004);
        assert_eq!(policy.next_eligible_at(1_000, 3), 1_008);
    }
}

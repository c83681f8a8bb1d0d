//! Retry policy for optimistic-concurrency write conflicts.
//!
//! Conflicts are expected under concurrent reconciliation; the whole
//! get-merge-update cycle is retried a bounded number of times with a
//! jittered, capped backoff. Exhausting the budget is fatal for that call.

use std::time::Duration;

use rand::Rng;

/// Bounded jittered-backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Base delay before the second attempt.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_millis(10),
            cap: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before retry number `attempt` (1-based: the delay
    /// after the first failure is `delay(1)`), doubled per attempt, capped,
    /// with up to 50% added jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let scaled = self.base.saturating_mul(1_u32 << exp).min(self.cap);
        let jitter = rand::rng().random_range(0.0..=0.5);
        scaled.mul_f64(1.0 + jitter).min(self.cap.mul_f64(1.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_stay_capped() {
        let policy = RetryPolicy::default();
        let first = policy.delay(1);
        assert!(first >= policy.base);

        let late = policy.delay(12);
        assert!(late <= policy.cap.mul_f64(1.5));
    }

    #[test]
    fn default_budget_is_five_attempts() {
        assert_eq!(RetryPolicy::default().attempts, 5);
    }
}

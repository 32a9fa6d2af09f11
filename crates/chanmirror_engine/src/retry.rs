//! Exponential backoff policy.

use std::time::Duration;

/// Decides whether a failed attempt is retried and how long to wait first.
///
/// The policy is stateless: callers own the retry counter and pass it in.
/// It does not look at error kinds; callers filter out non-retryable errors
/// before consulting it.
///
/// ```text
/// delay(n) = min(initial_delay * multiplier^n, max_delay)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Number of retries allowed after the first attempt.
    pub max_retries: u32,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the default multiplier (2) and a 5 minute cap.
    pub fn new(initial_delay: Duration, max_retries: u32) -> Self {
        Self {
            initial_delay,
            max_retries,
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_retries: 0,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Backoff to wait after the failure numbered `retry_count` (0-indexed).
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());

        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Returns true while the retry budget is not exhausted.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Total attempts this policy allows, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_doubles() {
        let policy = RetryPolicy::new(Duration::from_millis(1000), 3);

        assert_eq!(policy.calculate_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(4000));
    }

    #[test]
    fn delay_respects_max() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 10)
            .with_multiplier(10.0)
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.calculate_delay(5), Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn retry_budget() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 2);

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(0));
        assert_eq!(policy.max_attempts(), 1);
    }
}

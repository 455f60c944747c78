//! Attempt counting and exponential backoff for task retries.
//!
//! One `RetryController` is created per task run. It is a plain state
//! machine: the task runner asks whether another attempt is allowed and, if
//! so, how long to sleep first.

use std::time::Duration;

use weft_types::workflow::TaskRetry;

/// Per-task retry state.
#[derive(Debug, Clone)]
pub struct RetryController {
    max_attempts: u32,
    next_delay_secs: f64,
    backoff_multiplier: f64,
    max_delay_secs: f64,
}

impl RetryController {
    /// Build the controller for a task. No retry policy means one attempt.
    pub fn new(retry: Option<&TaskRetry>) -> Self {
        match retry {
            Some(policy) => Self {
                max_attempts: policy.max_attempts.max(1),
                next_delay_secs: sanitize(policy.delay_seconds),
                backoff_multiplier: sanitize(policy.backoff_multiplier),
                max_delay_secs: sanitize(policy.max_delay_seconds),
            },
            None => Self {
                max_attempts: 1,
                next_delay_secs: 0.0,
                backoff_multiplier: 1.0,
                max_delay_secs: 0.0,
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may follow the given (1-based) attempt.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to sleep before the next attempt; advances the backoff.
    ///
    /// The first call returns `delay_seconds` as configured. Each later call
    /// multiplies the previous delay by `backoff_multiplier`, capped at
    /// `max_delay_seconds`. Delays beyond `Duration::MAX` saturate.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next_delay_secs;
        self.next_delay_secs = (current * self.backoff_multiplier).min(self.max_delay_secs);
        Duration::try_from_secs_f64(current).unwrap_or(Duration::MAX)
    }
}

/// Negative and non-finite values are treated as zero.
fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { 0.0 }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, delay: f64, multiplier: f64, max_delay: f64) -> TaskRetry {
        TaskRetry {
            max_attempts,
            delay_seconds: delay,
            backoff_multiplier: multiplier,
            max_delay_seconds: max_delay,
        }
    }

    #[test]
    fn test_no_policy_single_attempt() {
        let controller = RetryController::new(None);
        assert_eq!(controller.max_attempts(), 1);
        assert!(!controller.should_retry(1));
    }

    #[test]
    fn test_should_retry_until_max_attempts() {
        let p = policy(3, 1.0, 2.0, 60.0);
        let controller = RetryController::new(Some(&p));
        assert!(controller.should_retry(1));
        assert!(controller.should_retry(2));
        assert!(!controller.should_retry(3));
    }

    #[test]
    fn test_zero_max_attempts_treated_as_one() {
        let p = policy(0, 1.0, 2.0, 60.0);
        assert_eq!(RetryController::new(Some(&p)).max_attempts(), 1);
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let p = policy(10, 1.0, 2.0, 5.0);
        let mut controller = RetryController::new(Some(&p));
        let delays: Vec<f64> = (0..5).map(|_| controller.next_delay().as_secs_f64()).collect();
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 5.0, 5.0]);
    }

    #[test]
    fn test_cap_applies_after_initial_delay() {
        let p = policy(4, 10.0, 2.0, 3.0);
        let mut controller = RetryController::new(Some(&p));
        assert_eq!(controller.next_delay(), Duration::from_secs(10));
        assert_eq!(controller.next_delay(), Duration::from_secs(3));
        assert_eq!(controller.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_huge_delays_saturate() {
        let p = policy(3, 1e20, 2.0, 1e30);
        let mut controller = RetryController::new(Some(&p));
        assert_eq!(controller.next_delay(), Duration::MAX);
        assert_eq!(controller.next_delay(), Duration::MAX);
    }

    #[test]
    fn test_negative_values_clamped() {
        let p = policy(3, -1.0, 2.0, 60.0);
        let mut controller = RetryController::new(Some(&p));
        assert_eq!(controller.next_delay(), Duration::ZERO);
    }
}

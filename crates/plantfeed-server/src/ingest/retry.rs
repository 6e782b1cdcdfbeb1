//! Retry policy applied around whole run attempts.
//!
//! The coordinator knows nothing about retries; the supervisor in
//! [`crate::ingest::service`] asks the policy whether another attempt is
//! allowed and how long to wait before it.

use rand::Rng;
use std::time::Duration;

use super::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    max_attempts: u32,
    backoff: Duration,
    backoff_max: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, backoff_max: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            backoff_max: backoff_max.max(backoff),
            jitter: false,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether retry number `retry` (1-based) may follow `error`.
    pub fn should_retry(&self, retry: u32, error: &IngestError) -> bool {
        retry >= 1 && retry <= self.max_attempts && error.is_retryable()
    }

    /// Ceiling for retry number `retry`: `backoff * 2^(retry-1)`, capped.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// Delay before retry number `retry`. With jitter the delay is drawn
    /// uniformly from `[0, base_delay]`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.base_delay(retry);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let millis = ceiling.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::rng().random_range(0..=millis))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60), Duration::from_secs(600)).with_jitter(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_secs(60), Duration::from_secs(600))
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let p = policy();
        let delays: Vec<u64> = (1..=6).map(|n| p.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![60, 120, 240, 480, 600, 600]);
    }

    #[test]
    fn test_huge_retry_numbers_do_not_overflow() {
        assert_eq!(policy().base_delay(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_jitter_stays_under_ceiling() {
        let p = policy().with_jitter(true);
        for n in 1..=5 {
            for _ in 0..50 {
                assert!(p.delay_for(n) <= p.base_delay(n));
            }
        }
    }

    #[test]
    fn test_should_retry_respects_attempt_budget_and_error_kind() {
        let p = policy();
        let timeout = IngestError::RunTimeout(1800);
        assert!(p.should_retry(1, &timeout));
        assert!(p.should_retry(5, &timeout));
        assert!(!p.should_retry(6, &timeout));

        let contention = IngestError::LockContention { holder: "run".into() };
        assert!(!p.should_retry(1, &contention));
        assert!(!p.should_retry(1, &IngestError::Cancelled(Uuid::nil())));
    }

    #[test]
    fn test_none_never_retries() {
        assert!(!RetryPolicy::none().should_retry(1, &IngestError::RunTimeout(1)));
    }
}

//! Exponential backoff with jitter for transient failures.

use std::time::Duration;

use rand::Rng;

use cadence_core::source::RetryConfig;

/// Computes retry delays: `base * 2^attempt`, capped, with up to 25% jitter
/// subtracted so concurrent retries spread out instead of stampeding.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self { base, cap, max_attempts }
    }

    pub fn from_retry_config(retry: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(retry.base_delay_ms),
            Duration::from_millis(retry.max_delay_ms),
            retry.max_attempts,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a retry is allowed after `attempt` failures (1-based count).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    ///
    /// The exponent is clamped so the shift cannot overflow before the cap
    /// applies.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let scaled = self.base.saturating_mul(1u32 << exp);
        scaled.min(self.cap)
    }

    /// Jittered delay: uniform in `[0.75 * raw, raw]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt);
        if raw.is_zero() {
            return raw;
        }
        let jitter_span = raw.as_millis() as u64 / 4;
        if jitter_span == 0 {
            return raw;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_span);
        raw - Duration::from_millis(jitter)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(500), Duration::from_secs(30), 5)
    }

    #[test]
    fn test_raw_delay_doubles() {
        let b = backoff();
        assert_eq!(b.raw_delay(1), Duration::from_millis(500));
        assert_eq!(b.raw_delay(2), Duration::from_millis(1000));
        assert_eq!(b.raw_delay(3), Duration::from_millis(2000));
        assert_eq!(b.raw_delay(4), Duration::from_millis(4000));
    }

    #[test]
    fn test_raw_delay_caps() {
        let b = backoff();
        assert_eq!(b.raw_delay(10), Duration::from_secs(30));
        // Large attempt numbers must not overflow.
        assert_eq!(b.raw_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jittered_delay_bounds() {
        let b = backoff();
        for attempt in 1..=6 {
            let raw = b.raw_delay(attempt);
            for _ in 0..20 {
                let d = b.delay(attempt);
                assert!(d <= raw, "jittered delay above raw");
                assert!(d >= raw.mul_f64(0.74), "jittered delay below 75% of raw");
            }
        }
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let b = backoff();
        assert!(b.should_retry(1));
        assert!(b.should_retry(4));
        assert!(!b.should_retry(5));
        assert!(!b.should_retry(6));
    }

    #[test]
    fn test_from_retry_config() {
        let b = Backoff::from_retry_config(&RetryConfig::default());
        assert_eq!(b.max_attempts(), 5);
        assert_eq!(b.raw_delay(1), Duration::from_millis(500));
    }
}

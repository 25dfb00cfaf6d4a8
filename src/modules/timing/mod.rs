//! Backoff computation for the delay strategy.
//!
//! The wait grows linearly with the attempt number, carries symmetric jitter
//! and is always clamped to the configured ceiling.

use std::time::Duration;

/// Delay envelope for `add_delay` attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    variance_pct: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(8))
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            variance_pct: 0.25,
        }
    }

    pub fn with_variance(mut self, variance_pct: f64) -> Self {
        self.variance_pct = variance_pct.clamp(0.0, 1.0);
        self
    }

    /// Wait before retrying at `attempt` (1-based). A server hint raises the
    /// floor but never lifts the wait above `max`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let mut delay = self.base.as_secs_f64() * attempt.max(1) as f64;

        let variance = delay * self.variance_pct;
        let jitter = rand::random::<f64>() * variance - (variance / 2.0);
        delay = (delay + jitter).max(0.0);

        if let Some(hint) = hint {
            delay = delay.max(hint.as_secs_f64());
        }

        Duration::try_from_secs_f64(delay.min(self.max.as_secs_f64())).unwrap_or(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_with_attempt() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10))
            .with_variance(0.0);
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(300));
    }

    #[test]
    fn never_exceeds_ceiling() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(2));
        for attempt in 1..10 {
            assert!(policy.delay_for(attempt, Some(Duration::from_secs(60))) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn unbounded_envelope_saturates() {
        let policy = BackoffPolicy::new(Duration::MAX, Duration::MAX);
        assert_eq!(policy.delay_for(u32::MAX, None), Duration::MAX);
    }

    #[test]
    fn hint_raises_floor() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_secs(5))
            .with_variance(0.0);
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
    }
}

use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff used between failed push attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Adds up to 50% random spread so parallel pushes do not retry in lockstep.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before the retry that follows failure number `attempt` (1-based).
    ///
    /// A provider supplied `retry_after` wins when it is longer than the
    /// computed backoff, but never exceeds `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let spread = delay.as_millis() as u64 / 2;
            if spread > 0 {
                let extra = rand::thread_rng().gen_range(0..=spread);
                delay = (delay + Duration::from_millis(extra)).min(self.max_delay);
            }
        }

        match retry_after {
            Some(hint) if hint > delay => hint.min(self.max_delay),
            _ => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(1)).without_jitter()
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = policy();
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4, None), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(40, None), Duration::from_secs(1));
    }

    #[test]
    fn retry_after_hint_extends_but_stays_capped() {
        let policy = policy();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_millis(700))),
            Duration::from_millis(700)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(60))),
            Duration::from_secs(1)
        );
        assert_eq!(
            policy.delay_for(3, Some(Duration::from_millis(10))),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(10));
        for _ in 0..50 {
            let delay = policy.delay_for(2, None);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn zero_base_delay_never_waits() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.delay_for(3, None), Duration::ZERO);
        assert_eq!(
            policy.delay_for(3, Some(Duration::from_millis(20))),
            Duration::from_millis(20)
        );
    }
}

//! Retry delay strategies.

use core::time::Duration;

/// An infinite iterator of delays growing by a constant increment, clamped
/// to a maximum.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConstantGrowth {
    delay: Duration,
    increment: Duration,
    max_delay: Duration,
}

impl ConstantGrowth {
    pub const fn new(delay: Duration, increment: Duration) -> Self {
        Self {
            delay,
            increment,
            max_delay: Duration::MAX,
        }
    }

    pub const fn clamp(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

impl Iterator for ConstantGrowth {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.delay;

        self.delay = self
            .delay
            .saturating_add(self.increment)
            .min(self.max_delay);

        Some(delay)
    }
}

/// Exponential backoff for message delivery retries: `base * 2^attempt`,
/// capped at `max_delay`.
pub fn retry_delay(attempt: u8, base: Duration, max_delay: Duration) -> Duration {
    let factor = 1u32.checked_shl(u32::from(attempt)).unwrap_or(u32::MAX);

    base.checked_mul(factor).unwrap_or(max_delay).min(max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_growth_is_clamped() {
        let strategy = ConstantGrowth::new(Duration::from_secs(1), Duration::from_secs(2))
            .clamp(Duration::from_secs(4));

        let delays: Vec<_> = strategy.take(4).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(4),
                Duration::from_secs(4),
            ]
        );
    }

    #[test]
    fn retry_delay_doubles_up_to_the_cap() {
        let base = Duration::from_secs(3);
        let cap = Duration::from_secs(60);

        assert_eq!(retry_delay(0, base, cap), Duration::from_secs(3));
        assert_eq!(retry_delay(1, base, cap), Duration::from_secs(6));
        assert_eq!(retry_delay(3, base, cap), Duration::from_secs(24));
        assert_eq!(retry_delay(10, base, cap), cap);
        assert_eq!(retry_delay(u8::MAX, base, cap), cap);
    }
}

//! Pluggable retry backoff strategies.

use std::time::Duration;

/// Computes the delay before a failed task's `retry_count`-th retry.
pub trait Backoff: Send + Sync {
    fn delay(&self, retry_count: u32) -> Duration;
}

/// `delay = base * multiplier^retry_count`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), max_delay: Duration::from_secs(5 * 60), multiplier: 2.0 }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, retry_count: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(retry_count as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// `delay = base * (retry_count + 1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    pub base: Duration,
    pub max_delay: Duration,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), max_delay: Duration::from_secs(5 * 60) }
    }
}

impl Backoff for LinearBackoff {
    fn delay(&self, retry_count: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * (retry_count as f64 + 1.0);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_and_caps() {
        let b = ExponentialBackoff { base: Duration::from_secs(1), max_delay: Duration::from_secs(10), multiplier: 2.0 };
        assert_eq!(b.delay(0), Duration::from_secs(1));
        assert_eq!(b.delay(1), Duration::from_secs(2));
        assert_eq!(b.delay(2), Duration::from_secs(4));
        assert_eq!(b.delay(10), Duration::from_secs(10));
    }

    #[test]
    fn linear_scales_and_caps() {
        let b = LinearBackoff { base: Duration::from_secs(1), max_delay: Duration::from_secs(3) };
        assert_eq!(b.delay(0), Duration::from_secs(1));
        assert_eq!(b.delay(1), Duration::from_secs(2));
        assert_eq!(b.delay(5), Duration::from_secs(3));
    }
}

//! Redelivery backoff for failed events.
//!
//! How many attempts an event gets travels on its envelope. The backoff only
//! decides how long a failed envelope waits in the delayed set before
//! consumers see it again.

use feedline_config::RedeliveryConfig;
use std::time::Duration;
use uuid::Uuid;

/// Delay before the redelivery of a failed event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&RedeliveryConfig::default())
    }
}

impl From<&RedeliveryConfig> for Backoff {
    fn from(config: &RedeliveryConfig) -> Self {
        Self {
            base: config.base_delay(),
            max: config.max_delay().max(config.base_delay()),
            factor: config.factor.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}

impl Backoff {
    /// The same delay after every failure.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            max: delay,
            factor: 1.0,
            jitter: 0.0,
        }
    }

    /// Failed events are visible again at once. Used by tests that drain
    /// retries synchronously.
    #[must_use]
    pub const fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay after the `attempt`-th delivery failed (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.base.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.factor.powi(exponent);
        let delay = if scaled.is_finite() && scaled < self.max.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max
        };

        if self.jitter > 0.0 {
            // symmetric spread of ±jitter/2 around the delay
            let spread = delay.as_secs_f64() * self.jitter;
            Duration::from_secs_f64((delay.as_secs_f64() + spread * (unit_random() - 0.5)).max(0.0))
        } else {
            delay
        }
    }
}

/// Uniform value in `[0, 1)` from the leading 48 random bits of a v4 uuid.
fn unit_random() -> f64 {
    let bits = (Uuid::new_v4().as_u128() >> 80) as u64;
    bits as f64 / (1u64 << 48) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let backoff = Backoff::fixed(Duration::from_secs(5));
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(4), Duration::from_secs(5));
    }

    #[test]
    fn test_immediate_has_no_delay() {
        assert_eq!(Backoff::immediate().delay(3), Duration::ZERO);
    }

    #[test]
    fn test_default_grows_exponentially_and_caps() {
        let backoff = Backoff::default().without_jitter();

        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let backoff = Backoff::default();
        for _ in 0..50 {
            let millis = backoff.delay(1).as_millis();
            assert!((950..=1050).contains(&millis), "{millis}");
        }
    }

    #[test]
    fn test_config_out_of_range_is_clamped() {
        let config = RedeliveryConfig {
            base_delay_ms: 200,
            max_delay_ms: 100,
            factor: 0.5,
            jitter: 3.0,
        };
        let backoff = Backoff::from(&config).without_jitter();

        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(5), Duration::from_millis(200));
    }
}

//! Reconnection Policy
//!
//! Exponential backoff for re-establishing a broker socket after an
//! unsolicited close: `delay = initial * multiplier^attempt`, capped, with a
//! hard limit on attempts. Jitter is available but off by default so the
//! sequence is non-decreasing.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::FeedSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Create a configuration with custom values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
            max_attempts,
        }
    }

    /// Create configuration from [`FeedSettings`].
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.0,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Stateful backoff sequence.
///
/// # Example
///
/// ```rust
/// use broker_stream_adapter::infrastructure::wire::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(10)));
///
/// // A successful reconnect starts over
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay.min(self.config.max_delay);
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt limit.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(adjusted_millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 10);
    }

    #[test]
    fn default_sequence_doubles_then_caps() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_secs())
            .collect();

        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60, 60, 60, 60]);
        assert!(!policy.should_retry());
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 3,
            ..Default::default()
        });

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                jitter_factor: 0.1,
                ..Default::default()
            });

            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        });

        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }

    proptest! {
        #[test]
        fn delays_are_non_decreasing_and_capped(
            initial_ms in 1u64..10_000,
            cap_ms in 1u64..120_000,
            multiplier in 1.0f64..4.0,
            attempts in 1u32..20,
        ) {
            let mut policy = ReconnectPolicy::new(ReconnectConfig::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(cap_ms),
                multiplier,
                0.0,
                attempts,
            ));

            let delays: Vec<Duration> = std::iter::from_fn(|| policy.next_delay()).collect();

            prop_assert_eq!(delays.len(), attempts as usize);
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            for d in &delays {
                prop_assert!(*d <= Duration::from_millis(cap_ms));
            }
        }
    }
}

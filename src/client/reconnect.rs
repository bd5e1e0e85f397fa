//! Backoff policy for the client transport.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When and how often a dropped transport retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Enable automatic reconnection on connection loss.
    /// Default: true
    pub enabled: bool,

    /// Maximum number of reconnection attempts before giving up.
    /// Set to 0 for unlimited attempts.
    /// Default: 5
    pub max_attempts: u32,

    /// Initial delay between reconnection attempts (milliseconds).
    /// Default: 1000ms
    pub initial_delay_ms: u64,

    /// Maximum delay between reconnection attempts (milliseconds).
    /// Default: 30000ms (30 seconds)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Spread each delay by up to 25% so clients dropped together do not
    /// retry together. Default: true
    pub jitter: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectionConfig {
    /// Create a config with reconnection disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay in milliseconds before retry number `attempt`.
    ///
    /// `attempt` counts from 1: the transport bumps its counter when a retry is
    /// scheduled and resets it to 0 once a socket opens, so the first retry
    /// after a loss waits `initial_delay_ms`. The result never exceeds
    /// `max_delay_ms` and never decreases as `attempt` grows, with or without
    /// jitter.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let cap = self.max_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay_ms as f64 * multiplier.powi(exponent);

        let delay = if self.jitter {
            base * (1.0 + self.jitter_spread() * jitter_factor())
        } else {
            base
        };
        delay.clamp(0.0, cap) as u64
    }

    /// Same as [`calculate_delay`](Self::calculate_delay), as a `Duration`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.calculate_delay(attempt))
    }

    /// Whether another retry may follow `attempts` failed ones.
    ///
    /// A failed connect counts the same as a dropped socket. Zero
    /// `max_attempts` retries forever.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempts < self.max_attempts)
    }

    /// Relative jitter band, at most 25%.
    ///
    /// Narrowed for small multipliers so the highest jittered delay of one
    /// attempt stays below the lowest of the next: `(1 + s) <= m * (1 - s)`.
    fn jitter_spread(&self) -> f64 {
        let m = self.backoff_multiplier as f64;
        MAX_JITTER.min((m - 1.0) / (m + 1.0)).max(0.0)
    }
}

const MAX_JITTER: f64 = 0.25;

/// Pseudo-random value in `[-1, 1]` from a time-seeded LCG.
fn jitter_factor() -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = (seed.wrapping_mul(1103515245).wrapping_add(12345) % (1 << 31)) as f64;
    random / (1u64 << 31) as f64 * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectionConfig {
        ReconnectionConfig {
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ReconnectionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(config.jitter);
    }

    #[test]
    fn test_disabled() {
        let config = ReconnectionConfig::disabled();
        assert!(!config.enabled);
        assert!(!config.should_retry(0));
    }

    #[test]
    fn test_should_retry() {
        let config = ReconnectionConfig::default();
        for attempt in 0..5 {
            assert!(config.should_retry(attempt));
        }
        assert!(!config.should_retry(5));
    }

    #[test]
    fn test_unlimited_attempts() {
        let config = ReconnectionConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.should_retry(1000));
    }

    #[test]
    fn test_delay_without_jitter() {
        let config = no_jitter();
        assert_eq!(config.calculate_delay(1), 1000);
        assert_eq!(config.calculate_delay(2), 2000);
        assert_eq!(config.calculate_delay(3), 4000);
        assert_eq!(config.calculate_delay(4), 8000);
        assert_eq!(config.calculate_delay(5), 16000);
        assert_eq!(config.calculate_delay(6), 30000);
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
    }

    #[test]
    fn test_delay_is_monotonic_until_cap() {
        let config = no_jitter();
        let delays: Vec<u64> = (1..=10).map(|a| config.calculate_delay(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), config.max_delay_ms);
    }

    #[test]
    fn test_delay_with_jitter_in_range() {
        let config = ReconnectionConfig::default();
        for _ in 0..20 {
            let delay = config.calculate_delay(1);
            assert!((750..=1250).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_jittered_delays_respect_cap_and_never_decrease() {
        let config = ReconnectionConfig {
            initial_delay_ms: 50,
            max_delay_ms: 200,
            ..Default::default()
        };
        assert!(config.jitter);

        for _ in 0..200 {
            let delays: Vec<u64> = (1..=8).map(|a| config.calculate_delay(a)).collect();
            assert!(
                delays.iter().all(|d| *d <= config.max_delay_ms),
                "delay above cap: {delays:?}"
            );
            assert!(
                delays.windows(2).all(|w| w[0] <= w[1]),
                "delay decreased: {delays:?}"
            );
            // Far past the cap every attempt waits exactly the cap
            assert_eq!(delays[7], config.max_delay_ms);
        }
    }

    #[test]
    fn test_no_jitter_band_without_growth() {
        let config = ReconnectionConfig {
            backoff_multiplier: 1.0,
            ..Default::default()
        };
        assert_eq!(config.calculate_delay(1), 1000);
        assert_eq!(config.calculate_delay(4), 1000);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ReconnectionConfig =
            serde_json::from_str(r#"{"max_attempts": 2, "jitter": false}"#).unwrap();
        assert_eq!(config.max_attempts, 2);
        assert!(!config.jitter);
        assert_eq!(config.initial_delay_ms, 1000);
    }
}

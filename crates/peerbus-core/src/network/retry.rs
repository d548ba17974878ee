//! Reconnect policy with exponential backoff and optional jitter.
//!
//! Active peers consult a [`RetryConfig`] every time a connection attempt
//! fails. [`Backoff`] keeps the per-peer attempt counter and is reset once a
//! connection is established.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Configuration for reconnect behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (typically 2.0 for doubling).
    pub exponential_base: f64,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of failed attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Retry forever.
    pub fn unlimited(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        // base * (exponential_base ^ attempt)
        let multiplier = self.exponential_base.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_secs = self.base_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            // Factor between 0.5 and 1.5 keeps the mean delay without near-zero waits
            let mut rng = rand::rng();
            let jitter_factor = rng.random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn permits(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures < max)
    }
}

/// Per-peer reconnect state.
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    failures: u32,
    last_delay: Option<Duration>,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt and return the delay before the next one,
    /// or `None` when the policy is exhausted.
    pub fn next_delay(&mut self, config: &RetryConfig) -> Option<Duration> {
        let attempt = self.failures;
        self.failures = self.failures.saturating_add(1);

        if !config.permits(self.failures) {
            debug!(
                "Reconnect policy exhausted after {} failed attempts",
                self.failures
            );
            return None;
        }

        let delay = config.calculate_delay(attempt);
        self.last_delay = Some(delay);
        Some(delay)
    }

    /// Number of consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }

    /// Forget past failures after a successful connection.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.last_delay = None;
    }
}

//! # Reconnect Backoff
//!
//! Delays between attempts to re-establish a lost broker connection.
//!
//! [`RetryPolicy`] describes the schedule; [`Backoff`] walks it for one
//! outage and reports when the attempt budget is spent.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule with optional proportional jitter
///
/// ```rust
/// use product_consumer_core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(5), 1.5);
/// assert_eq!(policy.max_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Reconnect attempts allowed per outage
    pub max_attempts: u32,

    pub initial_delay: Duration,

    /// Cap applied before jitter
    pub max_delay: Duration,

    pub backoff_multiplier: f64,

    /// Fraction of the delay added or removed at random; `0.0` disables
    pub jitter: f64,
}

impl RetryPolicy {
    pub const DEFAULT_JITTER: f64 = 0.25;

    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            jitter: Self::DEFAULT_JITTER,
        }
    }

    /// Set the jitter fraction, clamped to `0.0..=1.0`; NaN disables jitter
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() {
            0.0
        } else {
            jitter.clamp(0.0, 1.0)
        };
        self
    }

    /// Delay before the attempt numbered `attempt` (0-based), without jitter
    ///
    /// ```rust
    /// use product_consumer_core::retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default();
    ///
    /// assert_eq!(policy.base_delay(0), Duration::from_secs(1));
    /// assert_eq!(policy.base_delay(1), Duration::from_secs(2));
    /// assert_eq!(policy.base_delay(10), Duration::from_secs(30));
    /// ```
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let secs = self.initial_delay.as_secs_f64() * factor;

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Delay before `attempt` with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64((1.0 + spread).max(0.0))
    }

    /// Start walking this schedule for a new outage
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempts: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(30), 2.0)
    }
}

/// Progress through a [`RetryPolicy`] during one outage
#[derive(Debug, Clone)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
}

impl Backoff<'_> {
    /// Delay to wait before the next attempt, or `None` once the budget is
    /// spent. Each call counts as one attempt.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Attempts handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forget past attempts after a connection that worked
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

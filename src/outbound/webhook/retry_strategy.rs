use rand::Rng;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

/// Retry strategy for webhook delivery.
///
/// After failed attempt `n` the next attempt waits
/// `min(initial * 2^(n-1), max)`, scaled by a uniform factor in
/// `[1 - jitter, 1 + jitter]` so deliveries that failed together do not
/// retry together.
///
/// Every failure counts against the budget the same way: a 404 is retried
/// exactly like a 503 or a timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    max_attempts: u32,

    initial_delay: Duration,

    max_delay: Duration,

    jitter_ratio: f64,
}

impl RetryStrategy {
    /// Create a new retry strategy
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }

    /// Set maximum delay cap
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the jitter ratio, clamped to `[0, 1]`
    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Total attempts a delivery gets, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    /// Un-jittered delay after failed attempt `attempt` (1-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;

        2u32.checked_pow(exponent)
            .and_then(|multiplier| self.initial_delay.checked_mul(multiplier))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Jittered delay after failed attempt `attempt`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_ratio == 0.0 {
            return base;
        }

        let factor = rng.gen_range((1.0 - self.jitter_ratio)..=(1.0 + self.jitter_ratio));
        base.mul_f64(factor)
    }

    /// Check if a delivery that has made `attempt_count` attempts may try again
    pub fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Un-jittered delays between consecutive attempts
    pub fn base_delays(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .map(|attempt| self.base_delay(attempt))
            .collect()
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INITIAL_DELAY)
    }
}

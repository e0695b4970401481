use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter used between reconnection attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Share of the delay that is randomized, within `[0, 1]`.
    pub randomization_factor: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
            randomization_factor: 0.5,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// `min(max, base * 2^attempt)` before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(64) as i32);
        let millis = (self.base.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Delay before the attempt with the given zero based index.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.next_delay_with(attempt, sample)
    }

    /// Like [`ReconnectPolicy::next_delay`] with the jitter sample given,
    /// `sample` is clamped to `[-1, 1]`.
    pub fn next_delay_with(&self, attempt: u32, sample: f64) -> Duration {
        let delay = self.base_delay(attempt).as_millis() as f64;
        let factor = self.randomization_factor.clamp(0.0, 1.0);
        let jitter = delay * factor * sample.clamp(-1.0, 1.0);
        let millis = (delay + jitter).clamp(0.0, self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Whether `failures` consecutive failed attempts use up the budget.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.map_or(false, |max| failures >= max)
    }
}

use rand::Rng;
use std::time::Duration;

/// Exponential backoff bounded to `[min, max]` with optional jitter.
pub struct ExponentialBackoff {
    min_ms: u64,
    max_ms: u64,
    jitter_percent: u64,
}

impl ExponentialBackoff {
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self {
            min_ms: min.as_millis() as u64,
            max_ms: max.as_millis() as u64,
            jitter_percent: 10,
        }
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent;
        self
    }

    /// Delay for the given 0-indexed attempt: `min * 2^attempt`, capped at
    /// `max`, plus up to `jitter_percent` percent of the capped value.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .min_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(20)));
        let capped = exponential.clamp(self.min_ms, self.max_ms);
        let jitter = if self.jitter_percent > 0 {
            rand::thread_rng().gen_range(0..capped * self.jitter_percent / 100 + 1)
        } else {
            0
        };
        Duration::from_millis((capped + jitter).min(self.max_ms))
    }
}

use std::time::Duration;

use rand::Rng;

use crate::config::RetrySettings;

/// Exponential backoff schedule for one upstream call.
///
/// The n-th delay (0-based) is `delay * backoff^n`, capped at `max_delay`,
/// then scaled by a random factor in `[1 - jitter, 1 + jitter]` and capped again.
#[derive(Debug, Clone)]
pub struct Backoff {
    settings: RetrySettings,
    failures: i32,
}

impl Backoff {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            failures: 0,
        }
    }

    /// True while another attempt is allowed after the current failure.
    pub fn can_retry(&self) -> bool {
        (self.failures as u32) + 1 < self.settings.tries
    }

    /// Delay to wait before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base_delay(self.failures);
        self.failures += 1;
        let delay = apply_jitter(delay, self.settings.jitter, &mut rand::thread_rng());
        let secs = delay.min(self.settings.max_delay).max(0.0);
        // saturate instead of panicking on delays too large for a Duration
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Number of failed attempts seen so far.
    pub fn failures(&self) -> u32 {
        self.failures as u32
    }

    fn base_delay(&self, failures: i32) -> f64 {
        let s = &self.settings;
        (s.delay * s.backoff.powi(failures)).min(s.max_delay)
    }
}

fn apply_jitter<R: Rng>(delay: f64, jitter: f64, rng: &mut R) -> f64 {
    if jitter <= 0.0 || delay <= 0.0 {
        return delay;
    }
    let factor = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
    delay * factor
}

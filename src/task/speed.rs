//! Speed and remaining-time sampling

use std::time::{Duration, Instant};

/// Samples closer together than this are ignored
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Per-task byte-rate sampler driven by the session ticker
#[derive(Clone, Debug, Default)]
pub(crate) struct SpeedSampler {
    last_completed: u64,
    last_instant: Option<Instant>,
}

impl SpeedSampler {
    /// Start a new measuring window at `completed` bytes
    pub(crate) fn reset(&mut self, completed: u64, now: Instant) {
        self.last_completed = completed;
        self.last_instant = Some(now);
    }

    /// Take a sample; returns bytes per second since the previous one
    ///
    /// `None` if the window is too short to be meaningful.
    pub(crate) fn sample(&mut self, completed: u64, now: Instant) -> Option<u64> {
        let Some(last) = self.last_instant else {
            self.reset(completed, now);
            return None;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed < MIN_SAMPLE_INTERVAL {
            return None;
        }
        let delta = completed.saturating_sub(self.last_completed);
        self.reset(completed, now);
        Some((delta as f64 / elapsed.as_secs_f64()) as u64)
    }
}

/// Estimated seconds until `remaining` bytes arrive at `speed` bytes per second
///
/// Zero speed yields zero. Estimates in `[0.8, 1)` round up to one second so a
/// nearly finished transfer does not report "0 seconds left".
pub fn time_remaining(remaining: u64, speed: u64) -> u64 {
    if speed == 0 {
        return 0;
    }
    let seconds = remaining as f64 / speed as f64;
    if (0.8..1.0).contains(&seconds) {
        1
    } else {
        seconds as u64
    }
}

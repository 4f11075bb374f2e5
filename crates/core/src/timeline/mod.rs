use std::time::{Duration, Instant};

/// Monotonic clock that periodic lights are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    epoch: Instant,
}

impl PlaybackClock {
    /// Starts a clock whose epoch is now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.epoch = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Seconds since the epoch.
    pub fn seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::start()
    }
}

//! Exponential backoff for watch reconnects.

use std::time::Duration;

/// Each delay is 1.5x the previous one.
const GROWTH_NUM: u32 = 3;
const GROWTH_DEN: u32 = 2;

/// Smallest initial delay; growth by integer math stalls below it.
const MIN_INITIAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(MIN_INITIAL);
        let initial = initial.clamp(MIN_INITIAL, max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and grows the next one, up to `max`.
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * GROWTH_NUM / GROWTH_DEN).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
    }
}

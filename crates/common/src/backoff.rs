//! Exponential backoff with random jitter.

use std::time::Duration;

use rand::Rng;

/// Delay schedule that doubles per attempt, capped at `max`, with +/-25%
/// jitter so reconnecting accounts do not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(initial_ms), Duration::from_millis(max_ms))
    }

    /// Delay before retry number `attempt` (0-based) without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial.as_millis() as u64;
        let base_ms = initial_ms.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(base_ms).min(self.max)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as u64;
        let jitter_range = base_ms / 4;
        if jitter_range == 0 {
            return Duration::from_millis(base_ms);
        }
        let offset = rand::rng().random_range(0..=jitter_range * 2);
        Duration::from_millis(base_ms - jitter_range + offset)
    }

    /// Delay honoring a server-provided wait when it is longer.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay(attempt);
        match retry_after {
            Some(wait) if wait > delay => wait,
            _ => delay,
        }
    }
}

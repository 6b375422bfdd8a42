//! Millisecond wall clock driven by tokio's timer.
//!
//! Control state stores absolute epoch milliseconds, while timers need a
//! [`tokio::time::Instant`]. Anchoring both at one origin keeps them in step,
//! and under `#[tokio::test(start_paused = true)]` the clock follows the
//! paused runtime exactly.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

/// Roughly thirty years; the furthest a timer is ever armed.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Epoch-millisecond clock anchored to a tokio [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    base_ms: i64,
    origin: Instant,
}

impl Clock {
    /// Clock reading the current wall time.
    #[must_use]
    pub fn system() -> Self {
        Self::starting_at(Utc::now().timestamp_millis())
    }

    /// Clock that reads `base_ms` now and advances with tokio time.
    #[must_use]
    pub fn starting_at(base_ms: i64) -> Self {
        Self {
            base_ms,
            origin: Instant::now(),
        }
    }

    /// Current time in epoch milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.base_ms.saturating_add(elapsed)
    }

    /// The tokio instant corresponding to `epoch_ms`.
    ///
    /// Times before the clock's origin map to the origin, so sleeping until
    /// them returns immediately. Times too far ahead for the timer saturate
    /// to a distant instant.
    #[must_use]
    pub fn instant_at(&self, epoch_ms: i64) -> Instant {
        let offset = u64::try_from(epoch_ms.saturating_sub(self.base_ms)).unwrap_or(0);
        self.origin
            .checked_add(Duration::from_millis(offset))
            .unwrap_or_else(|| self.origin + FAR_FUTURE)
    }
}

//! Elapsed / remaining time derived from reported progress.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Snapshot of session timing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProgressEstimate {
    pub elapsed: Duration,
    /// Only defined while `0 < progress < 100`.
    pub remaining: Option<Duration>,
    pub progress: f64,
}

impl ProgressEstimate {
    /// Estimate from a monotonic start instant.
    ///
    /// Pure: depends only on its arguments, no accumulated state.
    #[must_use]
    pub fn compute(started: Instant, now: Instant, progress: f64) -> Self {
        Self::from_elapsed(now.saturating_duration_since(started), progress)
    }

    /// Estimate from an already measured elapsed duration.
    ///
    /// A projection too large for a `Duration` leaves `remaining` undefined.
    #[must_use]
    pub fn from_elapsed(elapsed: Duration, progress: f64) -> Self {
        let remaining = (progress > 0.0 && progress < 100.0)
            .then(|| {
                let total = elapsed.as_secs_f64() * 100.0 / progress;
                Duration::try_from_secs_f64((total - elapsed.as_secs_f64()).max(0.0)).ok()
            })
            .flatten();
        Self {
            elapsed,
            remaining,
            progress,
        }
    }
}

/// Render a duration as `42s` or `3m 5s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{seconds}s")
    } else {
        format!("{}m {}s", seconds / 60, seconds % 60)
    }
}

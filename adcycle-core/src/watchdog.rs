//! Time-based missed-vignette detection.
//!
//! Complements the navigation fallback in [`crate::cycle`]: both raise the
//! same `missedVignetteCount`, so either path can reach the threshold.

use crate::config::VignetteConfig;
use crate::tracking::AdCycleTracking;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Nothing to report: detection off, no vignette seen yet, or still inside the window.
    Quiet,
    /// Another vignette is overdue; the missed counter was raised.
    Missed { missed: u32 },
    /// The raised counter reached the threshold; a preroll should be requested.
    Trigger { missed: u32 },
}

/// Inspect the record at `now_ms`, raising the missed counter when the last
/// vignette is older than `window_ms`.
pub fn inspect(
    record: &mut AdCycleTracking,
    config: &VignetteConfig,
    window_ms: u64,
    now_ms: u64,
) -> WatchdogVerdict {
    if !config.detects_missed() || !record.has_seen_vignette() {
        return WatchdogVerdict::Quiet;
    }
    let elapsed = now_ms.saturating_sub(record.last_vignette_time);
    if elapsed <= window_ms {
        return WatchdogVerdict::Quiet;
    }

    record.missed_vignette_count = record.missed_vignette_count.saturating_add(1);
    let missed = record.missed_vignette_count;
    log::debug!("No vignette for {elapsed}ms, missed count now {missed}");
    if config.missed_threshold_reached(missed) {
        WatchdogVerdict::Trigger { missed }
    } else {
        WatchdogVerdict::Missed { missed }
    }
}

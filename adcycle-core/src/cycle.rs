//! Vignette/preroll cycle state machine.
//!
//! Transitions are pure functions over [`AdCycleTracking`]; the service runs
//! them inside a single store read-modify-write and acts on the returned
//! [`CycleAction`]. Nothing here touches timers or the ad queue.

use crate::config::VignetteConfig;
use crate::constants::{PREROLL_MARKER, VIGNETTE_MARKER};
use crate::tracking::{AdCycleTracking, Cycle};

/// What a navigation fragment tells us about the ad surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// The network is showing a vignette interstitial.
    Vignette,
    /// The network is showing a fullscreen (preroll) ad.
    Preroll,
    /// A navigation happened but no ad marker was present.
    Unmatched,
    /// Empty fragment, or identical to the previous one.
    Unchanged,
}

/// Classify `fragment` against the network markers and the previously seen value.
#[must_use]
pub fn classify(fragment: &str, previous: Option<&str>) -> FragmentKind {
    if fragment.contains(VIGNETTE_MARKER) {
        FragmentKind::Vignette
    } else if fragment.contains(PREROLL_MARKER) {
        FragmentKind::Preroll
    } else if fragment.is_empty() || previous == Some(fragment) {
        FragmentKind::Unchanged
    } else {
        FragmentKind::Unmatched
    }
}

/// Follow-up the service must schedule after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    None,
    /// Run `count` prerolls back to back.
    StartPrerollSequence { count: u32 },
    /// Missed-vignette fallback: request a single preroll.
    TriggerFallback,
}

/// Result of feeding one event through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStep {
    pub kind: FragmentKind,
    /// Set when the event moved the rotation into another cycle.
    pub switched_to: Option<Cycle>,
    pub action: CycleAction,
}

impl CycleStep {
    const fn idle(kind: FragmentKind) -> Self {
        Self {
            kind,
            switched_to: None,
            action: CycleAction::None,
        }
    }
}

/// Apply a classified fragment to the record.
pub fn apply(
    kind: FragmentKind,
    record: &mut AdCycleTracking,
    config: &VignetteConfig,
    now_ms: u64,
) -> CycleStep {
    if !config.enabled {
        return CycleStep::idle(kind);
    }
    match kind {
        FragmentKind::Vignette => record_vignette(record, config, now_ms),
        FragmentKind::Preroll => CycleStep {
            kind,
            switched_to: record_preroll(record, config),
            action: CycleAction::None,
        },
        FragmentKind::Unmatched => record_unmatched(record, config),
        FragmentKind::Unchanged => CycleStep::idle(kind),
    }
}

/// A vignette was shown by the network.
pub fn record_vignette(
    record: &mut AdCycleTracking,
    config: &VignetteConfig,
    now_ms: u64,
) -> CycleStep {
    record.vignette_count = record.vignette_count.saturating_add(1);
    record.total_vignette_count = record.total_vignette_count.saturating_add(1);
    record.last_vignette_time = now_ms;
    record.missed_vignette_count = 0;
    record.current_cycle = Cycle::Vignette;

    log::info!(
        "Vignette detected, count: {}/{}",
        record.vignette_count,
        config.vignette_to_preroll.count
    );

    if config.vignette_to_preroll.is_reached(record.vignette_count) {
        record.switch_to(Cycle::Preroll);
        let count = config.preroll_trigger_count();
        log::info!("Vignette threshold reached, triggering {count} preroll(s)");
        return CycleStep {
            kind: FragmentKind::Vignette,
            switched_to: Some(Cycle::Preroll),
            action: CycleAction::StartPrerollSequence { count },
        };
    }
    CycleStep::idle(FragmentKind::Vignette)
}

/// A preroll was observed, either through its fragment marker or through the
/// break-done callback of a preroll this engine requested.
///
/// Returns `Some(Cycle::Vignette)` when the preroll threshold moved the
/// rotation back to the vignette cycle.
pub fn record_preroll(record: &mut AdCycleTracking, config: &VignetteConfig) -> Option<Cycle> {
    record.preroll_count = record.preroll_count.saturating_add(1);
    record.total_preroll_count = record.total_preroll_count.saturating_add(1);
    record.missed_vignette_count = 0;
    record.current_cycle = Cycle::Preroll;

    log::info!(
        "Preroll recorded, count: {}/{}",
        record.preroll_count,
        config.preroll_to_vignette.count
    );

    if config.preroll_to_vignette.is_reached(record.preroll_count) {
        record.switch_to(Cycle::Vignette);
        // Vignettes are served by the network on its own; only the phase is recorded.
        log::info!(
            "Preroll threshold reached, entering vignette cycle ({} vignettes)",
            config.preroll_to_vignette.trigger
        );
        return Some(Cycle::Vignette);
    }
    None
}

/// A navigation without any ad marker: count it as a missed vignette.
pub fn record_unmatched(record: &mut AdCycleTracking, config: &VignetteConfig) -> CycleStep {
    record.missed_vignette_count = record.missed_vignette_count.saturating_add(1);
    let fallback = record.current_cycle == Cycle::Vignette
        && config.missed_threshold_reached(record.missed_vignette_count);
    if fallback {
        log::info!(
            "Missed vignette threshold reached ({}), falling back to preroll",
            record.missed_vignette_count
        );
    }
    CycleStep {
        kind: FragmentKind::Unmatched,
        switched_to: None,
        action: if fallback {
            CycleAction::TriggerFallback
        } else {
            CycleAction::None
        },
    }
}

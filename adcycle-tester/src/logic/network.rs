//! A seeded stand-in for the ad network's command queue.
//!
//! The network decides per break whether it fills, how long the creative
//! takes, and which lifecycle callbacks it reports. Callbacks are queued in
//! virtual time and handed back to the harness, which delivers them to the
//! rotation the way the browser's event loop would.

use std::cell::RefCell;
use std::rc::Rc;

use adcycle_core::{
    AdCommand, AdEvent, AdQueue, BreakId, BreakKind, Clock, ManualClock, PushError, ShowAd,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

/// How the queue answers pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    Healthy,
    /// The first `failures` break pushes throw an interstitial-unavailable error.
    InterstitialUnavailable { failures: u32 },
    /// Every break push throws a non-retryable error.
    Fatal,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkProfile {
    /// Milliseconds after the simulation starts before the tag reports ready.
    /// `None` keeps the tag missing for the whole run.
    pub ready_after_ms: Option<u64>,
    /// Probability that a break is filled with a creative.
    pub fill_rate: f64,
    /// Inclusive range of callback latency, in milliseconds.
    pub latency_ms: (u64, u64),
    pub errors: ErrorMode,
    /// Swallow every callback of the first break, as a hung creative would.
    pub stall_first_break: bool,
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self {
            ready_after_ms: Some(0),
            fill_rate: 0.8,
            latency_ms: (200, 1_500),
            errors: ErrorMode::Healthy,
            stall_first_break: false,
        }
    }
}

impl NetworkProfile {
    #[must_use]
    pub const fn ready_after(mut self, ready_after_ms: Option<u64>) -> Self {
        self.ready_after_ms = ready_after_ms;
        self
    }

    #[must_use]
    pub const fn fill_rate(mut self, fill_rate: f64) -> Self {
        self.fill_rate = fill_rate;
        self
    }

    #[must_use]
    pub const fn errors(mut self, errors: ErrorMode) -> Self {
        self.errors = errors;
        self
    }

    #[must_use]
    pub const fn stalling(mut self) -> Self {
        self.stall_first_break = true;
        self
    }
}

/// Callback kinds the network can report. Kept separate from [`AdEvent`]
/// because a reward's show function is only built at delivery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Callback {
    BeforeAd,
    BeforeReward,
    AdViewed,
    AfterAd,
    BreakDone(&'static str),
}

#[derive(Debug)]
struct Scheduled {
    at_ms: u64,
    seq: u64,
    id: BreakId,
    callback: Callback,
}

/// Counters the harness reads back after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub preroll_pushes: u32,
    pub reward_pushes: u32,
    pub preloads: u32,
    pub rejected_pushes: u32,
    pub filled: u32,
    pub unfilled: u32,
    pub stalled: u32,
    pub rewards_shown: u32,
}

#[derive(Debug)]
struct NetworkState {
    profile: NetworkProfile,
    rng: ChaCha8Rng,
    ready_at: Option<u64>,
    interstitial_failures_left: u32,
    pending: Vec<Scheduled>,
    next_seq: u64,
    breaks_seen: u32,
    stats: NetworkStats,
}

/// Shared handle; the rotation owns one clone as its queue, the harness keeps another.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    state: Rc<RefCell<NetworkState>>,
    clock: ManualClock,
}

impl SimulatedNetwork {
    #[must_use]
    pub fn new(profile: NetworkProfile, seed: u64, clock: ManualClock) -> Self {
        let now = clock.now_ms();
        let interstitial_failures_left = match profile.errors {
            ErrorMode::InterstitialUnavailable { failures } => failures,
            ErrorMode::Healthy | ErrorMode::Fatal => 0,
        };
        let state = NetworkState {
            ready_at: profile.ready_after_ms.map(|delay| now.saturating_add(delay)),
            rng: ChaCha8Rng::seed_from_u64(seed),
            profile,
            interstitial_failures_left,
            pending: Vec::new(),
            next_seq: 0,
            breaks_seen: 0,
            stats: NetworkStats::default(),
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            clock,
        }
    }

    #[must_use]
    pub fn stats(&self) -> NetworkStats {
        self.state.borrow().stats.clone()
    }

    /// Earliest queued callback, if any.
    #[must_use]
    pub fn next_callback_at(&self) -> Option<u64> {
        self.state.borrow().pending.iter().map(|s| s.at_ms).min()
    }

    /// Remove and build the earliest callback due at `now_ms`.
    pub fn pop_due(&self, now_ms: u64) -> Option<(BreakId, AdEvent)> {
        let (id, callback) = {
            let mut state = self.state.borrow_mut();
            let index = state
                .pending
                .iter()
                .enumerate()
                .filter(|(_, s)| s.at_ms <= now_ms)
                .min_by_key(|(_, s)| (s.at_ms, s.seq))
                .map(|(index, _)| index)?;
            let due = state.pending.swap_remove(index);
            (due.id, due.callback)
        };
        let event = match callback {
            Callback::BeforeAd => AdEvent::BeforeAd,
            Callback::BeforeReward => {
                let state = Rc::clone(&self.state);
                AdEvent::BeforeReward(ShowAd::new(move || {
                    state.borrow_mut().stats.rewards_shown += 1;
                }))
            }
            Callback::AdViewed => AdEvent::AdViewed,
            Callback::AfterAd => AdEvent::AfterAd,
            Callback::BreakDone(status) => AdEvent::BreakDone {
                status: Some(status.to_string()),
            },
        };
        Some((id, event))
    }

    fn plan_break(state: &mut NetworkState, now_ms: u64, id: BreakId, kind: &BreakKind) {
        state.breaks_seen += 1;
        if state.profile.stall_first_break && state.breaks_seen == 1 {
            state.stats.stalled += 1;
            return;
        }
        let (low, high) = state.profile.latency_ms;
        let latency = state.rng.gen_range(low..=high.max(low));
        let filled = state.rng.gen_bool(state.profile.fill_rate.clamp(0.0, 1.0));

        let callbacks: Vec<(u64, Callback)> = if filled {
            state.stats.filled += 1;
            let watch = state.rng.gen_range(5_000..=15_000);
            let mut callbacks = vec![(latency, Callback::BeforeAd)];
            if matches!(kind, BreakKind::Reward { .. }) {
                callbacks.push((latency + 50, Callback::BeforeReward));
            }
            callbacks.extend([
                (latency + watch, Callback::AdViewed),
                (latency + watch + 10, Callback::AfterAd),
                (latency + watch + 20, Callback::BreakDone("viewed")),
            ]);
            callbacks
        } else {
            state.stats.unfilled += 1;
            vec![(latency, Callback::BreakDone("frequencyCapped"))]
        };

        for (offset, callback) in callbacks {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(Scheduled {
                at_ms: now_ms.saturating_add(offset),
                seq,
                id,
                callback,
            });
        }
    }
}

impl AdQueue for SimulatedNetwork {
    fn is_ready(&self) -> bool {
        let now = self.clock.now_ms();
        self.state
            .borrow()
            .ready_at
            .is_some_and(|ready_at| now >= ready_at)
    }

    fn push(&mut self, command: &AdCommand) -> Result<(), PushError> {
        let now = self.clock.now_ms();
        let mut state = self.state.borrow_mut();
        let request = match command {
            AdCommand::Preload => {
                state.stats.preloads += 1;
                return Ok(());
            }
            AdCommand::Break(request) => request,
        };

        match state.profile.errors {
            ErrorMode::Fatal => {
                state.stats.rejected_pushes += 1;
                return Err(PushError::new("adBreak() called with invalid arguments"));
            }
            ErrorMode::InterstitialUnavailable { .. } if state.interstitial_failures_left > 0 => {
                state.interstitial_failures_left -= 1;
                state.stats.rejected_pushes += 1;
                return Err(PushError::new("Interstitial API not available yet"));
            }
            ErrorMode::InterstitialUnavailable { .. } | ErrorMode::Healthy => {}
        }

        match &request.kind {
            BreakKind::Preroll => state.stats.preroll_pushes += 1,
            BreakKind::Reward { .. } => state.stats.reward_pushes += 1,
        }
        Self::plan_break(&mut state, now, request.id, &request.kind);
        Ok(())
    }
}

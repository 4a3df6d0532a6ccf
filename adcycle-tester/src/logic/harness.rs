//! Runs one rotation against a [`SimulatedNetwork`] in virtual time.

use std::cell::Cell;
use std::rc::Rc;

use adcycle_core::{
    AdBreakHooks, AdCycleTracking, AdEvent, AdRotation, Clock, ManualClock, MemorySessionStore,
    SdkConfig, constants,
};
use anyhow::{Context, Result};
use serde::Serialize;

use super::network::{NetworkProfile, NetworkStats, SimulatedNetwork};

/// Wall time the simulated session starts at.
pub const SESSION_START_MS: u64 = 1_700_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The page fragment changes, as the network does when it shows an ad.
    Navigate(String),
    ShowPreroll,
    ShowReward,
    /// A new page load in the same browsing session.
    Reload,
    ResetTracking,
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub at_ms: u64,
    pub action: Action,
}

pub type Expectation = fn(&RunSummary) -> Result<()>;

#[derive(Clone)]
pub struct SimulationPlan {
    pub config: SdkConfig,
    pub network: NetworkProfile,
    pub script: Vec<ScriptStep>,
    pub horizon_ms: u64,
    pub expectations: Vec<Expectation>,
}

impl SimulationPlan {
    #[must_use]
    pub fn new(config: SdkConfig, network: NetworkProfile, horizon_ms: u64) -> Self {
        Self {
            config,
            network,
            script: Vec::new(),
            horizon_ms,
            expectations: Vec::new(),
        }
    }

    #[must_use]
    pub fn at(mut self, at_ms: u64, action: Action) -> Self {
        self.script.push(ScriptStep { at_ms, action });
        self
    }

    #[must_use]
    pub fn navigate(self, at_ms: u64, fragment: &str) -> Self {
        self.at(at_ms, Action::Navigate(fragment.to_string()))
    }

    #[must_use]
    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expectations.push(expectation);
        self
    }
}

/// Caller-visible hook activity for manually requested breaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HookCounts {
    pub before_ad: u32,
    pub ad_viewed: u32,
    pub after_ad: u32,
    pub break_done: u32,
    pub rewards_granted: u32,
}

#[derive(Default)]
struct HookCounters {
    before_ad: Cell<u32>,
    ad_viewed: Cell<u32>,
    after_ad: Cell<u32>,
    break_done: Cell<u32>,
    rewards_granted: Cell<u32>,
}

impl HookCounters {
    fn bump(cell: &Cell<u32>) {
        cell.set(cell.get() + 1);
    }

    fn snapshot(&self) -> HookCounts {
        HookCounts {
            before_ad: self.before_ad.get(),
            ad_viewed: self.ad_viewed.get(),
            after_ad: self.after_ad.get(),
            break_done: self.break_done.get(),
            rewards_granted: self.rewards_granted.get(),
        }
    }
}

fn counting_hooks(counters: &Rc<HookCounters>) -> AdBreakHooks {
    let before = Rc::clone(counters);
    let viewed = Rc::clone(counters);
    let after = Rc::clone(counters);
    let done = Rc::clone(counters);
    let reward = Rc::clone(counters);
    AdBreakHooks::new()
        .before_ad(move || HookCounters::bump(&before.before_ad))
        .ad_viewed(move || HookCounters::bump(&viewed.ad_viewed))
        .after_ad(move || HookCounters::bump(&after.after_ad))
        .break_done(move |_| HookCounters::bump(&done.break_done))
        .before_reward(move |show| {
            HookCounters::bump(&reward.rewards_granted);
            show.show();
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub seed: u64,
    pub record: Option<AdCycleTracking>,
    pub network: NetworkStats,
    pub hooks: HookCounts,
    /// Done events the network delivered, for any break.
    pub breaks_done: u32,
    pub pending_timers: usize,
    pub pending_breaks: usize,
    pub sequence_running: bool,
    pub listening: bool,
    pub initial_preroll_flag: bool,
    pub initial_reward_flag: bool,
    pub virtual_ms: u64,
}

type SimRotation = AdRotation<MemorySessionStore, SimulatedNetwork, ManualClock>;

pub struct Harness {
    plan: SimulationPlan,
    seed: u64,
    clock: ManualClock,
    storage: MemorySessionStore,
    network: SimulatedNetwork,
    rotation: SimRotation,
    counters: Rc<HookCounters>,
    fragment: String,
    breaks_done: u32,
}

impl Harness {
    /// # Errors
    /// Fails if the plan's configuration is rejected.
    pub fn new(plan: SimulationPlan, seed: u64) -> Result<Self> {
        let clock = ManualClock::starting_at(SESSION_START_MS);
        let storage = MemorySessionStore::default();
        let network = SimulatedNetwork::new(plan.network.clone(), seed, clock.clone());
        let rotation = AdRotation::new(
            plan.config.clone(),
            storage.clone(),
            network.clone(),
            clock.clone(),
        )
        .context("building rotation")?;
        Ok(Self {
            plan,
            seed,
            clock,
            storage,
            network,
            rotation,
            counters: Rc::new(HookCounters::default()),
            fragment: String::new(),
            breaks_done: 0,
        })
    }

    /// Drive the plan to its horizon.
    ///
    /// # Errors
    /// Fails if the rotation reports a storage error.
    pub fn run(mut self) -> Result<RunSummary> {
        let end = SESSION_START_MS + self.plan.horizon_ms;
        let mut script = self.plan.script.clone();
        script.sort_by_key(|step| step.at_ms);
        let mut script = script.into_iter().peekable();

        self.rotation.start(&self.fragment).context("starting rotation")?;

        loop {
            let next_step = script.peek().map(|step| SESSION_START_MS + step.at_ms);
            let Some(next) = [
                next_step,
                self.rotation.next_deadline(),
                self.network.next_callback_at(),
            ]
            .into_iter()
            .flatten()
            .min() else {
                break;
            };
            if next > end {
                break;
            }
            if next > self.clock.now_ms() {
                self.clock.set(next);
            }
            let now = self.clock.now_ms();

            while let Some(step) = script.next_if(|step| SESSION_START_MS + step.at_ms <= now) {
                self.perform(step.action)?;
            }
            while let Some((id, event)) = self.network.pop_due(now) {
                if matches!(event, AdEvent::BreakDone { .. }) {
                    self.breaks_done += 1;
                }
                if let Some(hook) = self.rotation.handle_ad_event(id, event)? {
                    hook.run();
                }
            }
            self.rotation.run_due_timers();
        }

        self.clock.set(self.clock.now_ms().max(end));
        self.summarize()
    }

    fn perform(&mut self, action: Action) -> Result<()> {
        log::debug!("t+{}ms {action:?}", self.clock.now_ms() - SESSION_START_MS);
        match action {
            Action::Navigate(fragment) => {
                self.fragment = fragment;
                self.rotation.on_fragment_changed(&self.fragment)?;
            }
            Action::ShowPreroll => {
                self.rotation.show_preroll(counting_hooks(&self.counters));
            }
            Action::ShowReward => {
                self.rotation
                    .show_reward(None, counting_hooks(&self.counters));
            }
            Action::Reload => {
                self.rotation.teardown();
                self.rotation = AdRotation::new(
                    self.plan.config.clone(),
                    self.storage.clone(),
                    self.network.clone(),
                    self.clock.clone(),
                )?;
                self.rotation.start(&self.fragment)?;
            }
            Action::ResetTracking => {
                self.rotation.reset_tracking()?;
            }
            Action::Teardown => self.rotation.teardown(),
        }
        Ok(())
    }

    fn summarize(&self) -> Result<RunSummary> {
        let flag = |key: &str| self.storage.value(key).as_deref() == Some(constants::FLAG_SET_VALUE);
        Ok(RunSummary {
            seed: self.seed,
            record: self.rotation.tracking_stats()?,
            network: self.network.stats(),
            hooks: self.counters.snapshot(),
            breaks_done: self.breaks_done,
            pending_timers: self.rotation.scheduled().len(),
            pending_breaks: self.rotation.pending_breaks(),
            sequence_running: self.rotation.sequence().is_some(),
            listening: self.rotation.is_listening(),
            initial_preroll_flag: flag(constants::INITIAL_PREROLL_FLAG_KEY),
            initial_reward_flag: flag(constants::INITIAL_REWARD_FLAG_KEY),
            virtual_ms: self.clock.now_ms() - SESSION_START_MS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcycle_core::{Cycle, VignetteConfig};

    fn rotation_plan() -> SimulationPlan {
        let config = SdkConfig::for_publisher("ca-pub-sim").with_vignette(VignetteConfig::active());
        SimulationPlan::new(config, NetworkProfile::default(), 90_000)
    }

    #[test]
    fn three_vignettes_lead_to_one_preroll() {
        let plan = rotation_plan()
            .navigate(1_000, "#google_vignette")
            .navigate(2_000, "#article-1")
            .navigate(3_000, "#google_vignette")
            .navigate(4_000, "#article-2")
            .navigate(5_000, "#google_vignette");
        let summary = Harness::new(plan, 11).unwrap().run().unwrap();
        let record = summary.record.unwrap();

        assert_eq!(summary.network.preroll_pushes, 1);
        assert_eq!(record.total_vignette_count, 3);
        assert_eq!(record.total_preroll_count, 1);
        assert_eq!(record.current_cycle, Cycle::Vignette);
        assert!(!summary.sequence_running);
    }

    #[test]
    fn manual_breaks_report_hooks() {
        let mut plan = rotation_plan()
            .at(1_000, Action::ShowPreroll)
            .at(2_000, Action::ShowReward);
        plan.network = NetworkProfile::default().fill_rate(1.0);
        let summary = Harness::new(plan, 5).unwrap().run().unwrap();

        assert_eq!(summary.hooks.break_done, 2);
        assert_eq!(summary.hooks.before_ad, 2);
        assert_eq!(summary.hooks.rewards_granted, 1);
        assert_eq!(summary.network.rewards_shown, 1);
        assert_eq!(summary.pending_breaks, 0);
    }
}

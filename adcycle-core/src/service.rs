//! The rotation service: one instance per page, single writer of the
//! tracking record.
//!
//! Hosts feed it navigation fragments and ad lifecycle events, and wake it at
//! [`AdRotation::next_deadline`] to run due timers. Every deferred step
//! (watchdog ticks, retries, sequence timeouts, one-shot delays) is a [`Task`]
//! in the service's own [`TimerQueue`], so [`AdRotation::teardown`] cancels all
//! of them at once.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::config::SdkConfig;
use crate::cycle::{self, CycleAction, FragmentKind};
use crate::error::SdkError;
use crate::hooks::{AdBreakHooks, AdEvent, PendingHook};
use crate::sequence::PrerollSequence;
use crate::timers::{TimerId, TimerQueue};
use crate::tracking::{AdCycleTracking, SessionFlag, StoreError, TrackingStore};
use crate::trigger::{self, AdBreakRequest, AdCommand, AttemptOutcome, BreakId, BreakKind};
use crate::watchdog::{self, WatchdogVerdict};
use crate::{AdQueue, Clock, SessionStore};

/// Deferred work held in the service's timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    WatchdogTick,
    InitialPreroll,
    InitialReward,
    StartSequence { count: u32 },
    FallbackTrigger,
    RetryBreak(BreakId),
    SequenceTimeout { break_id: BreakId },
    SequenceAdvance,
}

#[derive(Debug)]
struct InFlight {
    kind: BreakKind,
    hooks: Rc<RefCell<AdBreakHooks>>,
    attempt: u32,
}

pub struct AdRotation<S, Q, C> {
    config: SdkConfig,
    store: TrackingStore<S>,
    queue: Q,
    clock: C,
    timers: TimerQueue<Task>,
    in_flight: HashMap<BreakId, InFlight>,
    sequence: Option<PrerollSequence>,
    next_break: u64,
    listening: bool,
    previous_fragment: Option<String>,
}

impl<S, Q, C> AdRotation<S, Q, C>
where
    S: SessionStore,
    Q: AdQueue,
    C: Clock,
{
    /// Create a service for a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Config`] if `config` cannot drive the rotation.
    pub fn new(config: SdkConfig, storage: S, queue: Q, clock: C) -> Result<Self, SdkError> {
        config.validate()?;
        Ok(Self {
            config,
            store: TrackingStore::new(storage),
            queue,
            clock,
            timers: TimerQueue::new(),
            in_flight: HashMap::new(),
            sequence: None,
            next_break: 0,
            listening: false,
            previous_fragment: None,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SdkConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &TrackingStore<S> {
        &self.store
    }

    #[must_use]
    pub const fn queue(&self) -> &Q {
        &self.queue
    }

    pub const fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.listening
    }

    #[must_use]
    pub const fn sequence(&self) -> Option<&PrerollSequence> {
        self.sequence.as_ref()
    }

    /// Breaks requested but not yet reported done.
    #[must_use]
    pub fn pending_breaks(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    #[must_use]
    pub fn scheduled(&self) -> Vec<(u64, Task)> {
        self.timers.iter().map(|(at, task)| (at, *task)).collect()
    }

    /// Bring the rotation up: attach to navigation when the rotation is
    /// enabled, arm the one-shot initial preroll/reward, and preload.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Store`] if session storage is unusable.
    pub fn start(&mut self, fragment: &str) -> Result<(), SdkError> {
        if self.config.vignette.enabled {
            self.enable_hash_listener(fragment)?;
        }
        if let Some(delay) = self.config.vignette.initial_preroll_delay_ms() {
            self.arm_initial(SessionFlag::InitialPreroll, delay)?;
        }
        if let Some(delay) = self.config.reward.initial_reward_delay_ms() {
            self.arm_initial(SessionFlag::InitialReward, delay)?;
        }
        if self.config.preload_ad {
            self.preload();
        }
        log::info!(
            "C3 SDK initialized for {} ({})",
            self.config.pub_id,
            self.config.platform
        );
        Ok(())
    }

    /// Start observing navigation. `fragment` is the value current right now;
    /// an ad marker in it is counted, anything else only becomes the baseline.
    ///
    /// Returns whether the listener is active.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Store`] if the tracking record cannot be created.
    pub fn enable_hash_listener(&mut self, fragment: &str) -> Result<bool, SdkError> {
        if !self.config.vignette.enabled {
            log::debug!("Vignette rotation disabled, not listening");
            return Ok(false);
        }
        if self.listening {
            return Ok(true);
        }
        self.store.ensure()?;
        self.listening = true;
        if self.config.vignette.detects_missed() {
            self.schedule_in(self.config.timing.watchdog_interval_ms, Task::WatchdogTick);
        }

        let kind = match cycle::classify(fragment, None) {
            FragmentKind::Unmatched => FragmentKind::Unchanged,
            kind => kind,
        };
        self.observe(kind, fragment)?;
        Ok(true)
    }

    /// Handle a navigation fragment change.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Store`] if the tracking record cannot be updated.
    pub fn on_fragment_changed(&mut self, fragment: &str) -> Result<(), SdkError> {
        if !self.listening || !self.config.vignette.enabled {
            return Ok(());
        }
        let kind = cycle::classify(fragment, self.previous_fragment.as_deref());
        self.observe(kind, fragment)
    }

    fn observe(&mut self, kind: FragmentKind, fragment: &str) -> Result<(), SdkError> {
        self.previous_fragment = Some(fragment.to_string());
        if kind == FragmentKind::Unchanged {
            return Ok(());
        }

        let now = self.clock.now_ms();
        let vignette = &self.config.vignette;
        let (_, step) = self
            .store
            .modify(|record| cycle::apply(kind, record, vignette, now))?;

        let delay = self.config.timing.transition_delay_ms;
        match step.action {
            CycleAction::None => {}
            CycleAction::StartPrerollSequence { count } => {
                self.schedule_in(delay, Task::StartSequence { count });
            }
            CycleAction::TriggerFallback => {
                self.schedule_in(delay, Task::FallbackTrigger);
            }
        }
        Ok(())
    }

    /// Run every timer due at the clock's current time. Returns how many ran.
    pub fn run_due_timers(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut ran = 0;
        while let Some((_, task)) = self.timers.pop_due(now) {
            ran += 1;
            if let Err(err) = self.run_task(task) {
                log::error!("{task:?} failed: {err}");
            }
        }
        ran
    }

    fn run_task(&mut self, task: Task) -> Result<(), StoreError> {
        match task {
            Task::WatchdogTick => self.watchdog_tick()?,
            Task::InitialPreroll => self.fire_initial(SessionFlag::InitialPreroll)?,
            Task::InitialReward => self.fire_initial(SessionFlag::InitialReward)?,
            Task::StartSequence { count } => self.start_sequence(count),
            Task::FallbackTrigger => {
                self.request_break(BreakKind::Preroll, AdBreakHooks::default());
            }
            Task::RetryBreak(id) => self.attempt_break(id),
            Task::SequenceTimeout { break_id } => {
                let timed_out = self
                    .sequence
                    .as_mut()
                    .is_some_and(|seq| seq.time_out(break_id));
                if timed_out {
                    log::warn!("Preroll {break_id} may not have completed, continuing");
                    self.in_flight.remove(&break_id);
                    self.advance_sequence();
                }
            }
            Task::SequenceAdvance => {
                if self.sequence.as_mut().is_some_and(PrerollSequence::settled) {
                    self.advance_sequence();
                }
            }
        }
        Ok(())
    }

    fn watchdog_tick(&mut self) -> Result<(), StoreError> {
        if !self.listening {
            return Ok(());
        }
        self.schedule_in(self.config.timing.watchdog_interval_ms, Task::WatchdogTick);
        if self.store.get()?.is_none() {
            return Ok(());
        }

        let now = self.clock.now_ms();
        let window = self.config.timing.vignette_window_ms;
        let vignette = &self.config.vignette;
        let (_, verdict) = self
            .store
            .modify(|record| watchdog::inspect(record, vignette, window, now))?;
        if let WatchdogVerdict::Trigger { missed } = verdict {
            log::info!("{missed} vignettes missed, requesting preroll");
            self.request_break(BreakKind::Preroll, AdBreakHooks::default());
        }
        Ok(())
    }

    fn arm_initial(&mut self, flag: SessionFlag, delay_ms: u64) -> Result<(), StoreError> {
        if self.store.flag(flag)? {
            log::info!("{flag:?} already triggered this session, skipping");
            return Ok(());
        }
        let task = match flag {
            SessionFlag::InitialPreroll => Task::InitialPreroll,
            SessionFlag::InitialReward => Task::InitialReward,
        };
        self.schedule_in(delay_ms, task);
        Ok(())
    }

    fn fire_initial(&mut self, flag: SessionFlag) -> Result<(), StoreError> {
        // Another tab of the same session may have fired it meanwhile.
        if self.store.flag(flag)? {
            return Ok(());
        }
        self.store.set_flag(flag)?;
        log::info!("{flag:?} firing");
        match flag {
            SessionFlag::InitialPreroll => {
                self.request_break(BreakKind::Preroll, AdBreakHooks::default());
            }
            SessionFlag::InitialReward => {
                self.show_reward(None, AdBreakHooks::default());
            }
        }
        Ok(())
    }

    fn start_sequence(&mut self, count: u32) {
        if let Some(seq) = self.sequence.as_mut() {
            seq.extend(count);
            log::info!(
                "Preroll sequence running, target now {} ({} done)",
                seq.total(),
                seq.completed()
            );
            return;
        }
        self.sequence = Some(PrerollSequence::new(count));
        self.advance_sequence();
    }

    fn advance_sequence(&mut self) {
        let Some(seq) = self.sequence.as_ref() else {
            return;
        };
        if seq.is_finished() {
            log::info!("Preroll cycle completed: {} triggered", seq.total());
            self.sequence = None;
            return;
        }
        if !seq.wants_request() {
            return;
        }

        let break_id = self.request_break(BreakKind::Preroll, AdBreakHooks::default());
        let timeout = self.schedule_in(
            self.config.timing.completion_timeout_ms,
            Task::SequenceTimeout { break_id },
        );
        if let Some(seq) = self.sequence.as_mut() {
            seq.begin_step(break_id, timeout);
        }
    }

    /// Request a preroll with caller hooks, retrying while the network warms up.
    pub fn show_preroll(&mut self, hooks: AdBreakHooks) -> BreakId {
        self.request_break(BreakKind::Preroll, hooks)
    }

    /// Push a single reward break. The name defaults to the configured one.
    /// Push errors are logged; no cycle counter moves.
    pub fn show_reward(&mut self, name: Option<&str>, hooks: AdBreakHooks) -> BreakId {
        let id = self.allocate_break();
        let kind = BreakKind::Reward {
            name: name.map_or_else(|| self.config.reward.name.clone(), str::to_string),
        };
        let command = AdCommand::Break(AdBreakRequest {
            id,
            kind: kind.clone(),
        });
        match self.queue.push(&command) {
            Ok(()) => {
                log::info!("Reward ad triggered: {id}");
                self.in_flight.insert(
                    id,
                    InFlight {
                        kind,
                        hooks: Rc::new(RefCell::new(hooks)),
                        attempt: 0,
                    },
                );
            }
            Err(err) => log::error!("Reward ad trigger failed: {err}"),
        }
        id
    }

    fn allocate_break(&mut self) -> BreakId {
        self.next_break += 1;
        BreakId::new(self.next_break)
    }

    fn request_break(&mut self, kind: BreakKind, hooks: AdBreakHooks) -> BreakId {
        let id = self.allocate_break();
        self.in_flight.insert(
            id,
            InFlight {
                kind,
                hooks: Rc::new(RefCell::new(hooks)),
                attempt: 0,
            },
        );
        self.attempt_break(id);
        id
    }

    fn attempt_break(&mut self, id: BreakId) {
        let Some(entry) = self.in_flight.get_mut(&id) else {
            return;
        };
        let command = AdCommand::Break(AdBreakRequest {
            id,
            kind: entry.kind.clone(),
        });
        let policy = &self.config.timing.retry;
        match trigger::attempt(&mut self.queue, &command, entry.attempt, policy) {
            AttemptOutcome::Pushed => {
                log::info!("{} triggered: {id}", entry.kind.label());
            }
            AttemptOutcome::Retry { delay_ms, reason } => {
                entry.attempt += 1;
                log::debug!("{id} not pushed ({reason:?}), retrying in {delay_ms}ms");
                let at = self.clock.now_ms().saturating_add(delay_ms);
                self.timers.schedule(at, Task::RetryBreak(id));
            }
            AttemptOutcome::Abandoned => {
                log::error!(
                    "AdSense interstitial API not available after {} attempts",
                    policy.max_attempts
                );
                self.in_flight.remove(&id);
            }
            AttemptOutcome::Failed(err) => {
                log::error!("{} trigger failed: {err}", entry.kind.label());
                self.in_flight.remove(&id);
            }
        }
    }

    /// Route a lifecycle event reported by the network for break `id`.
    ///
    /// A preroll's done event updates the tracking record and completes the
    /// matching sequence step. The returned hook must be run by the caller
    /// once it no longer holds the service.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Store`] if the tracking record cannot be updated;
    /// the break is still retired.
    pub fn handle_ad_event(
        &mut self,
        id: BreakId,
        event: AdEvent,
    ) -> Result<Option<PendingHook>, SdkError> {
        let Some(entry) = self.in_flight.get(&id) else {
            log::debug!("Ignoring {} for unknown {id}", event.name());
            return Ok(None);
        };
        log::info!("{} ad - {}", entry.kind.label(), event.name());
        let hooks = Rc::clone(&entry.hooks);

        if matches!(event, AdEvent::BreakDone { .. }) {
            let kind = self
                .in_flight
                .remove(&id)
                .map_or(BreakKind::Preroll, |done| done.kind);
            self.complete_sequence_step(id);
            if kind == BreakKind::Preroll {
                let vignette = &self.config.vignette;
                let (record, switched) = self
                    .store
                    .modify(|record| cycle::record_preroll(record, vignette))?;
                if switched.is_some() {
                    log::info!("Preroll cycle done, entering vignette cycle");
                }
                log::debug!("Tracking after {id}: {record:?}");
            }
        }
        Ok(Some(PendingHook::new(hooks, event)))
    }

    fn complete_sequence_step(&mut self, id: BreakId) {
        let Some(seq) = self.sequence.as_mut() else {
            return;
        };
        if seq.waiting_on() != Some(id) {
            return;
        }
        let at = self
            .clock
            .now_ms()
            .saturating_add(self.config.timing.settle_delay_ms);
        let settle = self.timers.schedule(at, Task::SequenceAdvance);
        if let Some(timeout) = seq.complete(id, settle) {
            self.timers.cancel(timeout);
        }
    }

    /// # Errors
    ///
    /// Returns [`SdkError::Store`] if session storage cannot be read.
    pub fn tracking_stats(&self) -> Result<Option<AdCycleTracking>, SdkError> {
        Ok(self.store.get()?)
    }

    /// Drop the record and start a fresh default one.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Store`] if session storage rejects the change.
    pub fn reset_tracking(&mut self) -> Result<AdCycleTracking, SdkError> {
        self.store.reset()?;
        Ok(self.store.ensure()?)
    }

    /// Allow the one-shot initial preroll to fire again this session.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Store`] if session storage rejects the change.
    pub fn reset_initial_preroll_flag(&mut self) -> Result<(), SdkError> {
        Ok(self.store.clear_flag(SessionFlag::InitialPreroll)?)
    }

    /// Allow the one-shot initial reward to fire again this session.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Store`] if session storage rejects the change.
    pub fn reset_initial_reward_flag(&mut self) -> Result<(), SdkError> {
        Ok(self.store.clear_flag(SessionFlag::InitialReward)?)
    }

    /// Cancel every timer, drop the running sequence and pending breaks, and
    /// stop reacting to navigation. Manual breaks stay available.
    pub fn teardown(&mut self) {
        let cancelled = self.timers.len();
        self.timers.clear();
        self.sequence = None;
        self.in_flight.clear();
        self.listening = false;
        self.previous_fragment = None;
        log::info!("Rotation torn down, {cancelled} timer(s) cancelled");
    }

    fn preload(&mut self) {
        match self.queue.push(&AdCommand::Preload) {
            Ok(()) => log::debug!("Ad breaks preloading"),
            Err(err) => log::warn!("Preload push failed: {err}"),
        }
    }

    fn schedule_in(&mut self, delay_ms: u64, task: Task) -> TimerId {
        let at = self.clock.now_ms().saturating_add(delay_ms);
        self.timers.schedule(at, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PushError;
    use std::cell::Cell;
    use crate::config::{RewardConfig, Threshold, VignetteConfig};
    use crate::memory::{ManualClock, MemorySessionStore};
    use crate::tracking::Cycle;

    #[derive(Debug, Default)]
    struct RecordingQueue {
        ready: bool,
        fail_with: Option<String>,
        commands: Vec<AdCommand>,
        attempts: usize,
        readiness_checks: Cell<usize>,
    }

    impl RecordingQueue {
        fn ready() -> Self {
            Self {
                ready: true,
                ..Self::default()
            }
        }

        fn breaks(&self) -> Vec<BreakId> {
            self.commands
                .iter()
                .filter_map(|command| match command {
                    AdCommand::Break(request) => Some(request.id),
                    AdCommand::Preload => None,
                })
                .collect()
        }
    }

    impl AdQueue for RecordingQueue {
        fn is_ready(&self) -> bool {
            self.readiness_checks.set(self.readiness_checks.get() + 1);
            self.ready
        }

        fn push(&mut self, command: &AdCommand) -> Result<(), PushError> {
            self.attempts += 1;
            if let Some(message) = &self.fail_with {
                return Err(PushError::new(message.clone()));
            }
            self.commands.push(command.clone());
            Ok(())
        }
    }

    type Rotation = AdRotation<MemorySessionStore, RecordingQueue, ManualClock>;

    const T0: u64 = 1_700_000_000_000;

    fn vignette(v2p: Threshold, p2v: Threshold, max_missed: u32) -> VignetteConfig {
        VignetteConfig {
            enabled: true,
            vignette_to_preroll: v2p,
            preroll_to_vignette: p2v,
            max_vignette_missed: max_missed,
            initial_preroll_delay: 0,
        }
    }

    fn rotation_with(config: SdkConfig, queue: RecordingQueue) -> (Rotation, ManualClock) {
        let clock = ManualClock::starting_at(T0);
        let rotation =
            AdRotation::new(config, MemorySessionStore::default(), queue, clock.clone()).unwrap();
        (rotation, clock)
    }

    fn rotation(vignette: VignetteConfig) -> (Rotation, ManualClock) {
        let config = SdkConfig::for_publisher("ca-pub-1")
            .with_vignette(vignette)
            .with_preload(false);
        rotation_with(config, RecordingQueue::ready())
    }

    fn advance(rotation: &mut Rotation, clock: &ManualClock, ms: u64) {
        let target = clock.now_ms() + ms;
        while let Some(deadline) = rotation.next_deadline() {
            if deadline > target {
                break;
            }
            clock.set(deadline.max(clock.now_ms()));
            rotation.run_due_timers();
        }
        clock.set(target);
    }

    fn finish(rotation: &mut Rotation, id: BreakId) {
        if let Some(hook) = rotation
            .handle_ad_event(id, AdEvent::BreakDone { status: None })
            .unwrap()
        {
            hook.run();
        }
    }

    fn stats(rotation: &Rotation) -> AdCycleTracking {
        rotation.tracking_stats().unwrap().unwrap()
    }

    #[test]
    fn three_vignettes_switch_cycle_and_request_one_preroll() {
        let (mut rotation, clock) = rotation(VignetteConfig::active());
        rotation.start("").unwrap();
        for n in 0..3 {
            rotation
                .on_fragment_changed(&format!("#page{n}"))
                .unwrap();
            rotation.on_fragment_changed("#google_vignette").unwrap();
        }
        let record = stats(&rotation);
        assert_eq!(record.current_cycle, Cycle::Preroll);
        assert_eq!(record.vignette_count, 0);
        assert_eq!(record.preroll_count, 0);
        assert_eq!(record.total_vignette_count, 3);
        assert!(rotation.queue().breaks().is_empty());

        advance(&mut rotation, &clock, 100);
        assert_eq!(rotation.queue().breaks().len(), 1);
        assert_eq!(rotation.queue().attempts, 1);
    }

    #[test]
    fn preroll_threshold_returns_to_vignette_cycle() {
        let (mut rotation, _) = rotation(vignette(
            Threshold::new(3, 1),
            Threshold::new(2, 3),
            2,
        ));
        rotation.start("#goog_fullscreen_ad").unwrap();
        assert_eq!(stats(&rotation).preroll_count, 1);
        rotation.on_fragment_changed("#home").unwrap();
        rotation.on_fragment_changed("#goog_fullscreen_ad").unwrap();
        let record = stats(&rotation);
        assert_eq!(record.current_cycle, Cycle::Vignette);
        assert_eq!(record.preroll_count, 0);
        assert_eq!(record.vignette_count, 0);
        assert_eq!(record.total_preroll_count, 2);
    }

    #[test]
    fn baseline_fragment_is_not_a_missed_vignette() {
        let (mut rotation, _) = rotation(VignetteConfig::active());
        rotation.start("#settings").unwrap();
        assert_eq!(stats(&rotation), AdCycleTracking::default());
        rotation.on_fragment_changed("#settings").unwrap();
        assert_eq!(stats(&rotation).missed_vignette_count, 0);
    }

    #[test]
    fn second_unmatched_change_fires_fallback() {
        let (mut rotation, clock) = rotation(VignetteConfig::active());
        rotation.start("").unwrap();
        rotation.on_fragment_changed("#a").unwrap();
        advance(&mut rotation, &clock, 500);
        assert!(rotation.queue().breaks().is_empty());

        rotation.on_fragment_changed("#b").unwrap();
        let record = stats(&rotation);
        assert_eq!(record.missed_vignette_count, 2);
        assert_eq!(record.last_vignette_time, 0);
        advance(&mut rotation, &clock, 100);
        assert_eq!(rotation.queue().breaks().len(), 1);
    }

    #[test]
    fn returning_from_an_empty_fragment_counts_as_a_change() {
        let (mut rotation, _) = rotation(vignette(
            Threshold::new(3, 1),
            Threshold::new(1, 3),
            5,
        ));
        rotation.start("").unwrap();
        rotation.on_fragment_changed("#a").unwrap();
        rotation.on_fragment_changed("").unwrap();
        assert_eq!(stats(&rotation).missed_vignette_count, 1);
        rotation.on_fragment_changed("#a").unwrap();
        assert_eq!(stats(&rotation).missed_vignette_count, 2);
    }

    #[test]
    fn zero_max_missed_never_triggers() {
        let (mut rotation, clock) = rotation(vignette(
            Threshold::new(0, 1),
            Threshold::new(1, 3),
            0,
        ));
        rotation.start("").unwrap();
        rotation.on_fragment_changed("#google_vignette").unwrap();
        for n in 0..20 {
            rotation.on_fragment_changed(&format!("#p{n}")).unwrap();
            advance(&mut rotation, &clock, 60_000);
        }
        assert!(rotation.queue().breaks().is_empty());
        assert_eq!(rotation.next_deadline(), None);
    }

    #[test]
    fn watchdog_counts_overdue_vignettes() {
        let (mut rotation, clock) = rotation(VignetteConfig::active());
        rotation.start("#google_vignette").unwrap();
        assert_eq!(stats(&rotation).total_vignette_count, 1);

        advance(&mut rotation, &clock, 60_000);
        assert_eq!(stats(&rotation).missed_vignette_count, 0);
        advance(&mut rotation, &clock, 30_000);
        assert_eq!(stats(&rotation).missed_vignette_count, 1);
        assert!(rotation.queue().breaks().is_empty());
        advance(&mut rotation, &clock, 30_000);
        assert_eq!(stats(&rotation).missed_vignette_count, 2);
        assert_eq!(rotation.queue().breaks().len(), 1);
    }

    #[test]
    fn start_pushes_preload_configuration_once() {
        let config = SdkConfig::for_publisher("ca-pub-1");
        let (mut rotation, _clock) = rotation_with(config, RecordingQueue::ready());
        rotation.start("").unwrap();
        assert_eq!(rotation.queue().commands, vec![AdCommand::Preload]);
        assert!(rotation.queue().breaks().is_empty());
    }

    #[test]
    fn trigger_gives_up_after_five_attempts() {
        let config = SdkConfig::for_publisher("ca-pub-1").with_preload(false);
        let (mut rotation, clock) = rotation_with(config, RecordingQueue::default());
        rotation.show_preroll(AdBreakHooks::new());
        advance(&mut rotation, &clock, 60_000);
        assert_eq!(rotation.queue().readiness_checks.get(), 5);
        assert_eq!(rotation.queue().attempts, 0);
        assert_eq!(rotation.pending_breaks(), 0);
        assert_eq!(rotation.next_deadline(), None);

        rotation.queue_mut().ready = true;
        advance(&mut rotation, &clock, 60_000);
        assert_eq!(rotation.queue().attempts, 0);
    }

    #[test]
    fn persistent_interstitial_errors_stop_at_five_pushes() {
        let config = SdkConfig::for_publisher("ca-pub-1").with_preload(false);
        let mut queue = RecordingQueue::ready();
        queue.fail_with = Some("no interstitial API".into());
        let (mut rotation, clock) = rotation_with(config, queue);
        rotation.show_preroll(AdBreakHooks::new());
        advance(&mut rotation, &clock, 120_000);
        assert_eq!(rotation.queue().attempts, 5);
        assert_eq!(rotation.pending_breaks(), 0);
        assert_eq!(rotation.next_deadline(), None);
    }

    #[test]
    fn interstitial_errors_are_retried_other_errors_are_not() {
        let config = SdkConfig::for_publisher("ca-pub-1").with_preload(false);
        let mut queue = RecordingQueue::ready();
        queue.fail_with = Some("adBreak: no interstitial API".into());
        let (mut rotation, clock) = rotation_with(config, queue);
        rotation.show_preroll(AdBreakHooks::new());
        assert_eq!(rotation.queue().attempts, 1);
        rotation.queue_mut().fail_with = None;
        advance(&mut rotation, &clock, 1_000);
        assert_eq!(rotation.queue().breaks().len(), 1);

        rotation.queue_mut().fail_with = Some("boom".into());
        rotation.show_preroll(AdBreakHooks::new());
        advance(&mut rotation, &clock, 10_000);
        assert_eq!(rotation.queue().attempts, 3);
    }

    #[test]
    fn sequence_continues_after_timeout() {
        let (mut rotation, clock) = rotation(vignette(
            Threshold::new(1, 2),
            Threshold::new(5, 3),
            2,
        ));
        rotation.start("").unwrap();
        rotation.on_fragment_changed("#google_vignette").unwrap();
        advance(&mut rotation, &clock, 100);
        assert_eq!(rotation.queue().breaks().len(), 1);

        advance(&mut rotation, &clock, 29_999);
        assert_eq!(rotation.queue().breaks().len(), 1);
        advance(&mut rotation, &clock, 1);
        assert_eq!(rotation.queue().breaks().len(), 2);

        let second = rotation.queue().breaks()[1];
        finish(&mut rotation, second);
        advance(&mut rotation, &clock, 500);
        assert!(rotation.sequence().is_none());
        assert_eq!(rotation.queue().breaks().len(), 2);
    }

    #[test]
    fn timed_out_sequence_breaks_are_retired() {
        let (mut rotation, clock) = rotation(vignette(
            Threshold::new(1, 50),
            Threshold::new(5, 3),
            0,
        ));
        rotation.start("").unwrap();
        rotation.on_fragment_changed("#google_vignette").unwrap();
        advance(&mut rotation, &clock, 100);
        assert_eq!(rotation.pending_breaks(), 1);

        for _ in 0..50 {
            advance(&mut rotation, &clock, 31_000);
            assert!(rotation.pending_breaks() <= 1);
        }
        assert_eq!(rotation.queue().breaks().len(), 50);
        assert_eq!(rotation.pending_breaks(), 0);
        assert!(rotation.sequence().is_none());

        let late = rotation.queue().breaks()[0];
        assert!(
            rotation
                .handle_ad_event(late, AdEvent::BreakDone { status: None })
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn sequence_waits_for_its_own_break_then_settles() {
        let (mut rotation, clock) = rotation(vignette(
            Threshold::new(1, 2),
            Threshold::new(5, 3),
            2,
        ));
        rotation.start("").unwrap();
        rotation.on_fragment_changed("#google_vignette").unwrap();
        advance(&mut rotation, &clock, 100);
        let manual = rotation.show_preroll(AdBreakHooks::new());
        finish(&mut rotation, manual);
        advance(&mut rotation, &clock, 1_000);
        assert_eq!(rotation.queue().breaks().len(), 2);

        let first = rotation.queue().breaks()[0];
        finish(&mut rotation, first);
        advance(&mut rotation, &clock, 499);
        assert_eq!(rotation.queue().breaks().len(), 2);
        advance(&mut rotation, &clock, 1);
        assert_eq!(rotation.queue().breaks().len(), 3);
        assert_eq!(rotation.sequence().map(PrerollSequence::completed), Some(1));
        assert_eq!(stats(&rotation).total_preroll_count, 2);
    }

    #[test]
    fn new_request_extends_running_sequence() {
        let (mut rotation, clock) = rotation(vignette(
            Threshold::new(1, 1),
            Threshold::new(0, 3),
            2,
        ));
        rotation.start("").unwrap();
        rotation.on_fragment_changed("#google_vignette").unwrap();
        advance(&mut rotation, &clock, 100);
        rotation.on_fragment_changed("#x").unwrap();
        rotation.on_fragment_changed("#google_vignette").unwrap();
        advance(&mut rotation, &clock, 100);
        assert_eq!(rotation.queue().breaks().len(), 1);
        assert_eq!(rotation.sequence().map(PrerollSequence::total), Some(2));
    }

    #[test]
    fn manual_preroll_hooks_fire_after_bookkeeping() {
        let (mut rotation, _) = rotation(VignetteConfig::default());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let on_done = seen.clone();
        let on_viewed = seen.clone();
        let id = rotation.show_preroll(
            AdBreakHooks::new()
                .ad_viewed(move || on_viewed.borrow_mut().push("viewed".to_string()))
                .break_done(move |status| {
                    on_done
                        .borrow_mut()
                        .push(format!("done:{}", status.unwrap_or("-")));
                }),
        );
        rotation
            .handle_ad_event(id, AdEvent::AdViewed)
            .unwrap()
            .unwrap()
            .run();
        rotation
            .handle_ad_event(
                id,
                AdEvent::BreakDone {
                    status: Some("viewed".into()),
                },
            )
            .unwrap()
            .unwrap()
            .run();
        assert_eq!(*seen.borrow(), vec!["viewed", "done:viewed"]);
        assert_eq!(stats(&rotation).total_preroll_count, 1);
        assert!(rotation.handle_ad_event(id, AdEvent::AfterAd).unwrap().is_none());
    }

    #[test]
    fn reward_push_leaves_counters_alone() {
        let config = SdkConfig::for_publisher("ca-pub-1")
            .with_preload(false)
            .with_reward(RewardConfig {
                name: "coins".into(),
                initial_reward_delay: 0,
            });
        let (mut rotation, _) = rotation_with(config, RecordingQueue::ready());
        let id = rotation.show_reward(None, AdBreakHooks::new());
        assert_eq!(
            rotation.queue().commands,
            vec![AdCommand::Break(AdBreakRequest {
                id,
                kind: BreakKind::Reward {
                    name: "coins".into()
                },
            })]
        );
        finish(&mut rotation, id);
        assert_eq!(rotation.tracking_stats().unwrap(), None);
    }

    #[test]
    fn initial_preroll_fires_once_per_session() {
        let mut vignette = VignetteConfig::default();
        vignette.initial_preroll_delay = 5_000;
        let config = SdkConfig::for_publisher("ca-pub-1").with_vignette(vignette);
        let (mut rotation, clock) = rotation_with(config.clone(), RecordingQueue::ready());
        rotation.start("").unwrap();
        assert_eq!(rotation.queue().commands, vec![AdCommand::Preload]);
        advance(&mut rotation, &clock, 4_999);
        assert!(rotation.queue().breaks().is_empty());
        advance(&mut rotation, &clock, 1);
        assert_eq!(rotation.queue().breaks().len(), 1);

        let storage = rotation.store().storage().clone();
        let mut again = AdRotation::new(config, storage, RecordingQueue::ready(), clock.clone())
            .unwrap();
        again.start("").unwrap();
        assert_eq!(again.next_deadline(), None);

        again.reset_initial_preroll_flag().unwrap();
        again.start("").unwrap();
        assert_eq!(again.next_deadline(), Some(clock.now_ms() + 5_000));
    }

    #[test]
    fn teardown_cancels_everything() {
        let mut vignette = VignetteConfig::active();
        vignette.initial_preroll_delay = 10_000;
        let (mut rotation, clock) = rotation(vignette);
        rotation.start("").unwrap();
        rotation.queue_mut().ready = false;
        rotation.show_preroll(AdBreakHooks::new());
        assert!(rotation.next_deadline().is_some());

        rotation.teardown();
        assert_eq!(rotation.next_deadline(), None);
        assert_eq!(rotation.pending_breaks(), 0);
        assert!(!rotation.is_listening());
        rotation.on_fragment_changed("#google_vignette").unwrap();
        advance(&mut rotation, &clock, 120_000);
        assert_eq!(stats(&rotation).total_vignette_count, 0);
    }

    #[test]
    fn reset_tracking_recreates_default_record() {
        let (mut rotation, _) = rotation(VignetteConfig::active());
        rotation.start("#google_vignette").unwrap();
        assert_eq!(stats(&rotation).vignette_count, 1);
        assert_eq!(rotation.reset_tracking().unwrap(), AdCycleTracking::default());
        assert_eq!(stats(&rotation), AdCycleTracking::default());
    }

    #[test]
    fn disabled_rotation_ignores_navigation() {
        let (mut rotation, _) = rotation(VignetteConfig::default());
        rotation.start("#google_vignette").unwrap();
        assert!(!rotation.is_listening());
        rotation.on_fragment_changed("#google_vignette").unwrap();
        assert_eq!(rotation.tracking_stats().unwrap(), None);
    }
}

use std::cell::RefCell;
use std::rc::Rc;

use adcycle_core::constants::TRACKING_STORAGE_KEY;
use adcycle_core::{
    AdBreakHooks, AdCommand, AdEvent, AdQueue, AdRotation, BreakId, Clock, Cycle, ManualClock,
    MemorySessionStore, PushError, SdkConfig, SdkError, SdkOptions, SessionStore,
};

#[derive(Debug, Default, Clone)]
struct SharedQueue {
    commands: Rc<RefCell<Vec<AdCommand>>>,
}

impl SharedQueue {
    fn breaks(&self) -> Vec<BreakId> {
        self.commands
            .borrow()
            .iter()
            .filter_map(|command| match command {
                AdCommand::Break(request) => Some(request.id),
                AdCommand::Preload => None,
            })
            .collect()
    }
}

impl AdQueue for SharedQueue {
    fn is_ready(&self) -> bool {
        true
    }

    fn push(&mut self, command: &AdCommand) -> Result<(), PushError> {
        self.commands.borrow_mut().push(command.clone());
        Ok(())
    }
}

fn rotation_config() -> anyhow::Result<SdkConfig> {
    let options: SdkOptions = serde_json::from_str(
        r#"{
            "platform": "ads",
            "pubId": "ca-pub-0000000000000000",
            "preloadAd": false,
            "adsenseConfig": {
                "vignetteConfig": {
                    "enabled": true,
                    "vignetteToPreroll": {"count": 2, "trigger": 1},
                    "prerollToVignette": {"count": 1, "trigger": 3},
                    "maxVignetteMissed": 2
                }
            }
        }"#,
    )?;
    Ok(SdkConfig::from_options(options)?)
}

fn drain(
    rotation: &mut AdRotation<MemorySessionStore, SharedQueue, ManualClock>,
    clock: &ManualClock,
    ms: u64,
) {
    let target = clock.now_ms() + ms;
    while let Some(at) = rotation.next_deadline().filter(|at| *at <= target) {
        clock.set(at);
        rotation.run_due_timers();
    }
    clock.set(target);
}

#[test]
fn counters_survive_a_page_reload() -> anyhow::Result<()> {
    let storage = MemorySessionStore::default();
    let clock = ManualClock::starting_at(1_000_000);
    let queue = SharedQueue::default();

    let mut first = AdRotation::new(
        rotation_config()?,
        storage.clone(),
        queue.clone(),
        clock.clone(),
    )?;
    first.start("#intro")?;
    first.on_fragment_changed("#google_vignette")?;
    first.teardown();

    let mut second = AdRotation::new(
        rotation_config()?,
        storage.clone(),
        queue.clone(),
        clock.clone(),
    )?;
    second.start("#google_vignette")?;
    let record = second.tracking_stats()?.expect("record exists");
    assert_eq!(record.current_cycle, Cycle::Preroll);
    assert_eq!(record.total_vignette_count, 2);

    drain(&mut second, &clock, 100);
    let breaks = queue.breaks();
    assert_eq!(breaks.len(), 1);

    if let Some(hook) = second.handle_ad_event(breaks[0], AdEvent::BreakDone { status: None })? {
        hook.run();
    }
    let record = second.tracking_stats()?.expect("record exists");
    assert_eq!(record.current_cycle, Cycle::Vignette);
    assert_eq!(record.total_preroll_count, 1);
    assert_eq!(record.preroll_count, 0);

    let raw = storage.value(TRACKING_STORAGE_KEY).expect("persisted");
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(value["currentCycle"], "vignette");
    assert_eq!(value["totalVignetteCount"], 2);
    Ok(())
}

#[test]
fn session_end_forgets_everything() -> anyhow::Result<()> {
    let storage = MemorySessionStore::default();
    let clock = ManualClock::starting_at(5);
    let mut rotation =
        AdRotation::new(rotation_config()?, storage.clone(), SharedQueue::default(), clock)?;
    rotation.start("#google_vignette")?;
    assert!(rotation.tracking_stats()?.is_some());

    storage.clear();
    assert_eq!(rotation.tracking_stats()?, None);
    rotation.on_fragment_changed("#elsewhere")?;
    let record = rotation.tracking_stats()?.expect("recreated on write");
    assert_eq!(record.missed_vignette_count, 1);
    assert_eq!(record.total_vignette_count, 0);
    Ok(())
}

#[test]
fn manual_preroll_reports_every_sub_event() -> anyhow::Result<()> {
    let queue = SharedQueue::default();
    let clock = ManualClock::starting_at(1);
    let mut rotation = AdRotation::new(
        rotation_config()?,
        MemorySessionStore::default(),
        queue.clone(),
        clock,
    )?;

    let journal = Rc::new(RefCell::new(Vec::<&'static str>::new()));
    let hooks = {
        let (a, b, c, d, e) = (
            journal.clone(),
            journal.clone(),
            journal.clone(),
            journal.clone(),
            journal.clone(),
        );
        AdBreakHooks::new()
            .before_ad(move || a.borrow_mut().push("beforeAd"))
            .ad_dismissed(move || b.borrow_mut().push("adDismissed"))
            .ad_viewed(move || c.borrow_mut().push("adViewed"))
            .after_ad(move || d.borrow_mut().push("afterAd"))
            .break_done(move |_| e.borrow_mut().push("adBreakDone"))
    };
    let id = rotation.show_preroll(hooks);
    assert_eq!(queue.breaks(), vec![id]);

    for event in [
        AdEvent::BeforeAd,
        AdEvent::AdViewed,
        AdEvent::AfterAd,
        AdEvent::BreakDone {
            status: Some("viewed".into()),
        },
    ] {
        if let Some(hook) = rotation.handle_ad_event(id, event)? {
            hook.run();
        }
    }
    assert_eq!(
        *journal.borrow(),
        vec!["beforeAd", "adViewed", "afterAd", "adBreakDone"]
    );
    assert_eq!(rotation.pending_breaks(), 0);
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct BrokenStorage;

#[derive(Debug)]
struct QuotaExceeded;

impl std::fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("QuotaExceededError")
    }
}

impl std::error::Error for QuotaExceeded {}

impl SessionStore for BrokenStorage {
    type Error = QuotaExceeded;

    fn get_item(&self, _key: &str) -> Result<Option<String>, Self::Error> {
        Ok(None)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), Self::Error> {
        Err(QuotaExceeded)
    }

    fn remove_item(&self, _key: &str) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[test]
fn storage_failures_surface_as_store_errors() -> anyhow::Result<()> {
    let mut rotation = AdRotation::new(
        rotation_config()?,
        BrokenStorage,
        SharedQueue::default(),
        ManualClock::starting_at(1),
    )?;
    let err = rotation.start("").unwrap_err();
    assert!(matches!(err, SdkError::Store(_)));
    assert!(err.to_string().contains("QuotaExceededError"));
    Ok(())
}

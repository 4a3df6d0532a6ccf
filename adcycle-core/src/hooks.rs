//! Ad-break lifecycle events and the caller hooks attached to a break.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The network's "show the rewarded ad now" continuation.
pub struct ShowAd(Box<dyn FnOnce()>);

impl ShowAd {
    pub fn new(show: impl FnOnce() + 'static) -> Self {
        Self(Box::new(show))
    }

    pub fn show(self) {
        (self.0)();
    }
}

impl fmt::Debug for ShowAd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShowAd(..)")
    }
}

/// Lifecycle callback reported by the network for one requested break.
#[derive(Debug)]
pub enum AdEvent {
    BeforeAd,
    BeforeReward(ShowAd),
    AdDismissed,
    AdViewed,
    /// Only reported when an ad was actually shown.
    AfterAd,
    /// Always reported, filled or not. `status` is the network's breakStatus.
    BreakDone { status: Option<String> },
}

impl AdEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BeforeAd => "beforeAd",
            Self::BeforeReward(_) => "beforeReward",
            Self::AdDismissed => "adDismissed",
            Self::AdViewed => "adViewed",
            Self::AfterAd => "afterAd",
            Self::BreakDone { .. } => "adBreakDone",
        }
    }
}

type Hook = Box<dyn FnMut()>;

/// Caller callbacks for a manual preroll or reward break. Each hook only
/// fires for its own event; unset hooks are skipped.
#[derive(Default)]
pub struct AdBreakHooks {
    before_ad: Option<Hook>,
    before_reward: Option<Box<dyn FnMut(ShowAd)>>,
    ad_dismissed: Option<Hook>,
    ad_viewed: Option<Hook>,
    after_ad: Option<Hook>,
    break_done: Option<Box<dyn FnMut(Option<&str>)>>,
}

impl AdBreakHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before_ad(mut self, hook: impl FnMut() + 'static) -> Self {
        self.before_ad = Some(Box::new(hook));
        self
    }

    /// Without this hook the rewarded ad is shown as soon as it is offered.
    #[must_use]
    pub fn before_reward(mut self, hook: impl FnMut(ShowAd) + 'static) -> Self {
        self.before_reward = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn ad_dismissed(mut self, hook: impl FnMut() + 'static) -> Self {
        self.ad_dismissed = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn ad_viewed(mut self, hook: impl FnMut() + 'static) -> Self {
        self.ad_viewed = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn after_ad(mut self, hook: impl FnMut() + 'static) -> Self {
        self.after_ad = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn break_done(mut self, hook: impl FnMut(Option<&str>) + 'static) -> Self {
        self.break_done = Some(Box::new(hook));
        self
    }

    /// Route `event` to its hook.
    pub fn dispatch(&mut self, event: AdEvent) {
        match event {
            AdEvent::BeforeAd => fire(self.before_ad.as_mut()),
            AdEvent::BeforeReward(show) => match self.before_reward.as_mut() {
                Some(hook) => hook(show),
                None => show.show(),
            },
            AdEvent::AdDismissed => fire(self.ad_dismissed.as_mut()),
            AdEvent::AdViewed => fire(self.ad_viewed.as_mut()),
            AdEvent::AfterAd => fire(self.after_ad.as_mut()),
            AdEvent::BreakDone { status } => {
                if let Some(hook) = self.break_done.as_mut() {
                    hook(status.as_deref());
                }
            }
        }
    }
}

fn fire(hook: Option<&mut Hook>) {
    if let Some(hook) = hook {
        hook();
    }
}

impl fmt::Debug for AdBreakHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdBreakHooks")
            .field("before_ad", &self.before_ad.is_some())
            .field("before_reward", &self.before_reward.is_some())
            .field("ad_dismissed", &self.ad_dismissed.is_some())
            .field("ad_viewed", &self.ad_viewed.is_some())
            .field("after_ad", &self.after_ad.is_some())
            .field("break_done", &self.break_done.is_some())
            .finish()
    }
}

/// A hook call released by the service, to be run once the caller no longer
/// holds the service. Hooks may call back into the public operations.
#[must_use = "hooks only fire when run"]
pub struct PendingHook {
    hooks: Rc<RefCell<AdBreakHooks>>,
    event: AdEvent,
}

impl PendingHook {
    pub(crate) const fn new(hooks: Rc<RefCell<AdBreakHooks>>, event: AdEvent) -> Self {
        Self { hooks, event }
    }

    pub fn run(self) {
        let Ok(mut hooks) = self.hooks.try_borrow_mut() else {
            log::warn!("Dropping nested {} hook", self.event.name());
            return;
        };
        hooks.dispatch(self.event);
    }
}

impl fmt::Debug for PendingHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingHook").field(&self.event.name()).finish()
    }
}

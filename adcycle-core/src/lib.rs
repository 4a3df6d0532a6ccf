//! Adcycle Engine
//!
//! Platform-agnostic core of the interstitial/preroll ad rotation.
//! This crate owns the tracking record, the cycle state machine, missed-vignette
//! detection, the retrying interstitial trigger, and the sequential preroll
//! scheduler, without any browser dependencies. Hosts plug in storage, the ad
//! network's command queue, and a clock through the traits below.

pub mod config;
pub mod constants;
pub mod cycle;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod sequence;
pub mod service;
pub mod timers;
pub mod tracking;
pub mod trigger;
pub mod watchdog;

// Re-export commonly used types
pub use config::{
    AdsenseOptions, Backoff, ConfigError, Platform, RetryPolicy, RewardConfig, SdkConfig,
    SdkOptions, Threshold, TimingConfig, VignetteConfig,
};
pub use cycle::{CycleAction, CycleStep, FragmentKind, classify};
pub use error::SdkError;
pub use hooks::{AdBreakHooks, AdEvent, PendingHook, ShowAd};
pub use memory::{ManualClock, MemorySessionStore};
pub use sequence::{PrerollSequence, SequenceState};
pub use service::{AdRotation, Task};
pub use timers::{TimerId, TimerQueue};
pub use tracking::{
    AdCycleTracking, Cycle, SessionFlag, StoreError, TrackingPatch, TrackingStore,
};
pub use trigger::{AdBreakRequest, AdCommand, AttemptOutcome, BreakId, BreakKind, PushError};
pub use watchdog::WatchdogVerdict;

/// Crate version reported to hosts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Session-scoped key/value storage.
///
/// Each platform provides its own implementation.
pub trait SessionStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn set_item(&self, key: &str, value: &str) -> Result<(), Self::Error>;

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the removal.
    fn remove_item(&self, key: &str) -> Result<(), Self::Error>;
}

/// The ad network's append-only command queue.
pub trait AdQueue {
    /// Whether the network has finished loading and accepts commands.
    fn is_ready(&self) -> bool;

    /// Append `command` to the queue.
    ///
    /// # Errors
    ///
    /// Returns the error the network raised while accepting the command.
    fn push(&mut self, command: &AdCommand) -> Result<(), PushError>;
}

/// Wall-clock source in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

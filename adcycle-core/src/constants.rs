//! Fixed contract values and reference timing defaults for the rotation engine.
//!
//! Storage keys and fragment markers are a compatibility contract with pages
//! and ad tags already in the wild; they must stay byte-for-byte stable.
//! Timing values are only defaults and can be overridden through
//! [`crate::config::TimingConfig`].

// Session storage keys -----------------------------------------------------
pub const TRACKING_STORAGE_KEY: &str = "c3_adsense_ad_tracking";
pub const INITIAL_PREROLL_FLAG_KEY: &str = "c3_adsense_initial_preroll_triggered";
pub const INITIAL_REWARD_FLAG_KEY: &str = "c3_adsense_initial_reward_triggered";
pub const FLAG_SET_VALUE: &str = "true";

// Navigation fragment markers ----------------------------------------------
pub const VIGNETTE_MARKER: &str = "google_vignette";
pub const PREROLL_MARKER: &str = "goog_fullscreen_ad";

// Push error classification ------------------------------------------------
pub(crate) const INTERSTITIAL_ERROR_PATTERN: &str = "interstitial";

// Defaults -----------------------------------------------------------------
pub(crate) const DEFAULT_REWARD_NAME: &str = "c3_reward";
pub(crate) const DEFAULT_VIGNETTE_TO_PREROLL_COUNT: u32 = 3;
pub(crate) const DEFAULT_VIGNETTE_TO_PREROLL_TRIGGER: u32 = 1;
pub(crate) const DEFAULT_PREROLL_TO_VIGNETTE_COUNT: u32 = 1;
pub(crate) const DEFAULT_PREROLL_TO_VIGNETTE_TRIGGER: u32 = 3;
pub(crate) const DEFAULT_MAX_VIGNETTE_MISSED: u32 = 2;

// Timing (milliseconds) ----------------------------------------------------
pub(crate) const WATCHDOG_INTERVAL_MS: u64 = 30_000;
pub(crate) const VIGNETTE_WINDOW_MS: u64 = 60_000;
pub(crate) const COMPLETION_TIMEOUT_MS: u64 = 30_000;
pub(crate) const SETTLE_DELAY_MS: u64 = 500;
pub(crate) const TRANSITION_DELAY_MS: u64 = 100;

// Retry policy -------------------------------------------------------------
pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 5;
pub(crate) const RETRY_SHORT_ATTEMPTS: u32 = 2;
pub(crate) const NOT_READY_SHORT_DELAY_MS: u64 = 500;
pub(crate) const NOT_READY_LONG_DELAY_MS: u64 = 1_000;
pub(crate) const PUSH_ERROR_SHORT_DELAY_MS: u64 = 1_000;
pub(crate) const PUSH_ERROR_LONG_DELAY_MS: u64 = 2_000;

pub(crate) const MS_PER_SECOND: u64 = 1_000;

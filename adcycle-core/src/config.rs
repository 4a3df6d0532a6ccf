//! Initialization options and the validated configuration derived from them.
//!
//! Hosts hand over a loosely-typed [`SdkOptions`] (usually straight from a JS
//! object); [`SdkConfig::from_options`] fills defaults, applies the legacy
//! top-level `vignetteConfig` fallback, and rejects caller misuse up front.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::constants::{
    COMPLETION_TIMEOUT_MS, DEFAULT_MAX_VIGNETTE_MISSED, DEFAULT_PREROLL_TO_VIGNETTE_COUNT,
    DEFAULT_PREROLL_TO_VIGNETTE_TRIGGER, DEFAULT_REWARD_NAME,
    DEFAULT_VIGNETTE_TO_PREROLL_COUNT, DEFAULT_VIGNETTE_TO_PREROLL_TRIGGER,
    NOT_READY_LONG_DELAY_MS, NOT_READY_SHORT_DELAY_MS, PUSH_ERROR_LONG_DELAY_MS,
    PUSH_ERROR_SHORT_DELAY_MS, RETRY_MAX_ATTEMPTS, RETRY_SHORT_ATTEMPTS, SETTLE_DELAY_MS,
    TRANSITION_DELAY_MS, VIGNETTE_WINDOW_MS, WATCHDOG_INTERVAL_MS,
};

/// Errors raised synchronously when the caller supplies unusable options.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("platform is required")]
    MissingPlatform,
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("platform `{0}` has no interstitial rotation")]
    NotRotating(Platform),
    #[error("pubId is required")]
    MissingPubId,
    #[error("{field} must be greater than zero")]
    ZeroTiming { field: &'static str },
}

/// Ad platforms known to the SDK. Only [`Platform::Ads`] drives the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ads,
    Gpt,
    Afs,
}

impl Platform {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ads => "ads",
            Self::Gpt => "gpt",
            Self::Afs => "afs",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" => Err(ConfigError::MissingPlatform),
            "ads" => Ok(Self::Ads),
            "gpt" => Ok(Self::Gpt),
            "afs" => Ok(Self::Afs),
            other => Err(ConfigError::UnsupportedPlatform(other.to_string())),
        }
    }
}

/// A cycle transition rule: after `count` events, switch and request `trigger` ads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub trigger: u32,
}

impl Threshold {
    #[must_use]
    pub const fn new(count: u32, trigger: u32) -> Self {
        Self { count, trigger }
    }

    /// A zero count disables the transition permanently.
    #[must_use]
    pub const fn is_reached(self, observed: u32) -> bool {
        self.count > 0 && observed >= self.count
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VignetteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "VignetteConfig::default_vignette_to_preroll")]
    pub vignette_to_preroll: Threshold,
    #[serde(default = "VignetteConfig::default_preroll_to_vignette")]
    pub preroll_to_vignette: Threshold,
    #[serde(default = "VignetteConfig::default_max_vignette_missed")]
    pub max_vignette_missed: u32,
    /// Milliseconds after start-up before the one-shot preroll fires (0
    /// disables). Given in seconds on the wire.
    #[serde(default, with = "seconds")]
    pub initial_preroll_delay: u64,
}

impl VignetteConfig {
    const fn default_vignette_to_preroll() -> Threshold {
        Threshold::new(
            DEFAULT_VIGNETTE_TO_PREROLL_COUNT,
            DEFAULT_VIGNETTE_TO_PREROLL_TRIGGER,
        )
    }

    const fn default_preroll_to_vignette() -> Threshold {
        Threshold::new(
            DEFAULT_PREROLL_TO_VIGNETTE_COUNT,
            DEFAULT_PREROLL_TO_VIGNETTE_TRIGGER,
        )
    }

    const fn default_max_vignette_missed() -> u32 {
        DEFAULT_MAX_VIGNETTE_MISSED
    }

    /// Same thresholds as the default, with the state machine switched on.
    #[must_use]
    pub fn active() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Number of prerolls requested when the vignette threshold is reached.
    #[must_use]
    pub const fn preroll_trigger_count(&self) -> u32 {
        if self.vignette_to_preroll.trigger == 0 {
            1
        } else {
            self.vignette_to_preroll.trigger
        }
    }

    /// Whether missed-vignette detection (watchdog and fallback) is active.
    #[must_use]
    pub const fn detects_missed(&self) -> bool {
        self.enabled && self.max_vignette_missed > 0
    }

    #[must_use]
    pub const fn missed_threshold_reached(&self, missed: u32) -> bool {
        self.max_vignette_missed > 0 && missed >= self.max_vignette_missed
    }

    #[must_use]
    pub const fn initial_preroll_delay_ms(&self) -> Option<u64> {
        non_zero(self.initial_preroll_delay)
    }
}

impl Default for VignetteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vignette_to_preroll: Self::default_vignette_to_preroll(),
            preroll_to_vignette: Self::default_preroll_to_vignette(),
            max_vignette_missed: Self::default_max_vignette_missed(),
            initial_preroll_delay: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardConfig {
    #[serde(default = "RewardConfig::default_name")]
    pub name: String,
    /// Milliseconds after start-up before the one-shot reward fires (0
    /// disables). Given in seconds on the wire.
    #[serde(default, with = "seconds")]
    pub initial_reward_delay: u64,
}

impl RewardConfig {
    fn default_name() -> String {
        DEFAULT_REWARD_NAME.to_string()
    }

    #[must_use]
    pub const fn initial_reward_delay_ms(&self) -> Option<u64> {
        non_zero(self.initial_reward_delay)
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            initial_reward_delay: 0,
        }
    }
}

/// Short/long delay pair; the short delay applies to the first few attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub short: u64,
    pub long: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetryPolicy::default_short_attempts")]
    pub short_attempts: u32,
    #[serde(default = "RetryPolicy::default_not_ready_delay")]
    pub not_ready_delay_ms: Backoff,
    #[serde(default = "RetryPolicy::default_push_error_delay")]
    pub push_error_delay_ms: Backoff,
}

impl RetryPolicy {
    const fn default_max_attempts() -> u32 {
        RETRY_MAX_ATTEMPTS
    }

    const fn default_short_attempts() -> u32 {
        RETRY_SHORT_ATTEMPTS
    }

    const fn default_not_ready_delay() -> Backoff {
        Backoff {
            short: NOT_READY_SHORT_DELAY_MS,
            long: NOT_READY_LONG_DELAY_MS,
        }
    }

    const fn default_push_error_delay() -> Backoff {
        Backoff {
            short: PUSH_ERROR_SHORT_DELAY_MS,
            long: PUSH_ERROR_LONG_DELAY_MS,
        }
    }

    #[must_use]
    pub const fn not_ready_delay(&self, attempt: u32) -> u64 {
        self.pick(self.not_ready_delay_ms, attempt)
    }

    #[must_use]
    pub const fn push_error_delay(&self, attempt: u32) -> u64 {
        self.pick(self.push_error_delay_ms, attempt)
    }

    const fn pick(&self, backoff: Backoff, attempt: u32) -> u64 {
        if attempt < self.short_attempts {
            backoff.short
        } else {
            backoff.long
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            short_attempts: Self::default_short_attempts(),
            not_ready_delay_ms: Self::default_not_ready_delay(),
            push_error_delay_ms: Self::default_push_error_delay(),
        }
    }
}

/// Every delay the engine waits on, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    #[serde(default = "TimingConfig::default_watchdog_interval")]
    pub watchdog_interval_ms: u64,
    #[serde(default = "TimingConfig::default_vignette_window")]
    pub vignette_window_ms: u64,
    #[serde(default = "TimingConfig::default_completion_timeout")]
    pub completion_timeout_ms: u64,
    #[serde(default = "TimingConfig::default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default = "TimingConfig::default_transition_delay")]
    pub transition_delay_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl TimingConfig {
    const fn default_watchdog_interval() -> u64 {
        WATCHDOG_INTERVAL_MS
    }

    const fn default_vignette_window() -> u64 {
        VIGNETTE_WINDOW_MS
    }

    const fn default_completion_timeout() -> u64 {
        COMPLETION_TIMEOUT_MS
    }

    const fn default_settle_delay() -> u64 {
        SETTLE_DELAY_MS
    }

    const fn default_transition_delay() -> u64 {
        TRANSITION_DELAY_MS
    }

    /// Reject values that would spin a timer in place or never attempt a push.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroTiming`] naming the first offending field.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.watchdog_interval_ms == 0 {
            return Err(ConfigError::ZeroTiming {
                field: "watchdogIntervalMs",
            });
        }
        if self.completion_timeout_ms == 0 {
            return Err(ConfigError::ZeroTiming {
                field: "completionTimeoutMs",
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroTiming {
                field: "retry.maxAttempts",
            });
        }
        Ok(())
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: Self::default_watchdog_interval(),
            vignette_window_ms: Self::default_vignette_window(),
            completion_timeout_ms: Self::default_completion_timeout(),
            settle_delay_ms: Self::default_settle_delay(),
            transition_delay_ms: Self::default_transition_delay(),
            retry: RetryPolicy::default(),
        }
    }
}

/// AdSense-specific block of the options object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdsenseOptions {
    #[serde(default)]
    pub vignette_config: Option<VignetteConfig>,
    #[serde(default)]
    pub reward_config: Option<RewardConfig>,
}

/// Raw initialization options as supplied by the host page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkOptions {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub pub_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub native_afg_support: Option<bool>,
    #[serde(default)]
    pub preload_ad: Option<bool>,
    #[serde(default)]
    pub adsense_config: Option<AdsenseOptions>,
    /// Legacy location for the vignette block, used when `adsenseConfig` has none.
    #[serde(default)]
    pub vignette_config: Option<VignetteConfig>,
    #[serde(default)]
    pub timing: Option<TimingConfig>,
}

/// Validated configuration the rotation service runs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkConfig {
    pub platform: Platform,
    pub pub_id: String,
    pub channel_id: String,
    pub native_afg_support: bool,
    pub preload_ad: bool,
    pub vignette: VignetteConfig,
    pub reward: RewardConfig,
    pub timing: TimingConfig,
}

impl SdkConfig {
    /// Defaults for an AdSense publisher with the rotation disabled.
    #[must_use]
    pub fn for_publisher(pub_id: impl Into<String>) -> Self {
        Self {
            platform: Platform::Ads,
            pub_id: pub_id.into(),
            channel_id: String::new(),
            native_afg_support: true,
            preload_ad: true,
            vignette: VignetteConfig::default(),
            reward: RewardConfig::default(),
            timing: TimingConfig::default(),
        }
    }

    #[must_use]
    pub fn with_vignette(mut self, vignette: VignetteConfig) -> Self {
        self.vignette = vignette;
        self
    }

    #[must_use]
    pub fn with_reward(mut self, reward: RewardConfig) -> Self {
        self.reward = reward;
        self
    }

    #[must_use]
    pub const fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub const fn with_preload(mut self, preload_ad: bool) -> Self {
        self.preload_ad = preload_ad;
        self
    }

    /// Normalise raw options into a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the platform is missing or unknown, the
    /// platform has no rotation, the publisher id is missing, or a timing
    /// value is zero.
    pub fn from_options(options: SdkOptions) -> Result<Self, ConfigError> {
        let platform: Platform = options
            .platform
            .as_deref()
            .unwrap_or_default()
            .parse()?;

        let pub_id = options.pub_id.unwrap_or_default().trim().to_string();
        if pub_id.is_empty() && platform != Platform::Afs {
            return Err(ConfigError::MissingPubId);
        }

        let adsense = options.adsense_config.unwrap_or_default();
        let config = Self {
            platform,
            pub_id,
            channel_id: options.channel_id.unwrap_or_default(),
            native_afg_support: options.native_afg_support.unwrap_or(true),
            preload_ad: options.preload_ad.unwrap_or(true),
            vignette: adsense
                .vignette_config
                .or(options.vignette_config)
                .unwrap_or_default(),
            reward: adsense.reward_config.unwrap_or_default(),
            timing: options.timing.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns a [`ConfigError`] when this configuration cannot drive the rotation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform != Platform::Ads {
            return Err(ConfigError::NotRotating(self.platform));
        }
        if self.pub_id.trim().is_empty() {
            return Err(ConfigError::MissingPubId);
        }
        self.timing.validate()
    }
}

const fn non_zero(ms: u64) -> Option<u64> {
    if ms == 0 { None } else { Some(ms) }
}

/// Whole or fractional seconds on the wire, milliseconds in memory. Zero,
/// negative and non-finite values mean "disabled".
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::constants::MS_PER_SECOND;

    #[allow(clippy::cast_precision_loss)]
    const MS_PER_SECOND_F64: f64 = MS_PER_SECOND as f64;

    pub fn serialize<S>(ms: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[allow(clippy::cast_precision_loss)]
        let seconds = *ms as f64 / MS_PER_SECOND_F64;
        serializer.serialize_f64(seconds)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
        if !seconds.is_finite() || seconds <= 0.0 {
            return Ok(0);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ms = (seconds * MS_PER_SECOND_F64).round() as u64;
        Ok(ms)
    }
}

//! Session-scoped tracking record and the store that persists it.
//!
//! The record is read lazily, merged, and written back as a whole. Every
//! writer inside the crate goes through [`TrackingStore::modify`], and the
//! rotation service is the only owner of its store, so a read-modify-write can
//! never be split by another event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SessionStore;
use crate::constants::{
    FLAG_SET_VALUE, INITIAL_PREROLL_FLAG_KEY, INITIAL_REWARD_FLAG_KEY, TRACKING_STORAGE_KEY,
};

/// Rotation phase deciding which counter is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cycle {
    #[default]
    Vignette,
    Preroll,
}

impl Cycle {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Vignette => "vignette",
            Self::Preroll => "preroll",
        }
    }
}

/// Counters persisted for the current browsing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdCycleTracking {
    #[serde(default)]
    pub vignette_count: u32,
    #[serde(default)]
    pub preroll_count: u32,
    /// Milliseconds since the epoch; 0 means no vignette observed yet.
    #[serde(default)]
    pub last_vignette_time: u64,
    #[serde(default)]
    pub missed_vignette_count: u32,
    #[serde(default)]
    pub total_vignette_count: u32,
    #[serde(default)]
    pub total_preroll_count: u32,
    #[serde(default)]
    pub current_cycle: Cycle,
}

impl AdCycleTracking {
    /// Zero both cycle counters and enter `cycle`.
    pub const fn switch_to(&mut self, cycle: Cycle) {
        self.vignette_count = 0;
        self.preroll_count = 0;
        self.current_cycle = cycle;
    }

    #[must_use]
    pub const fn has_seen_vignette(&self) -> bool {
        self.last_vignette_time > 0
    }
}

/// Partial update merged onto the stored record; `None` leaves a field as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackingPatch {
    pub vignette_count: Option<u32>,
    pub preroll_count: Option<u32>,
    pub last_vignette_time: Option<u64>,
    pub missed_vignette_count: Option<u32>,
    pub total_vignette_count: Option<u32>,
    pub total_preroll_count: Option<u32>,
    pub current_cycle: Option<Cycle>,
}

impl TrackingPatch {
    pub fn apply(&self, record: &mut AdCycleTracking) {
        if let Some(value) = self.vignette_count {
            record.vignette_count = value;
        }
        if let Some(value) = self.preroll_count {
            record.preroll_count = value;
        }
        if let Some(value) = self.last_vignette_time {
            record.last_vignette_time = value;
        }
        if let Some(value) = self.missed_vignette_count {
            record.missed_vignette_count = value;
        }
        if let Some(value) = self.total_vignette_count {
            record.total_vignette_count = value;
        }
        if let Some(value) = self.total_preroll_count {
            record.total_preroll_count = value;
        }
        if let Some(value) = self.current_cycle {
            record.current_cycle = value;
        }
    }
}

/// One-shot markers remembered for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlag {
    InitialPreroll,
    InitialReward,
}

impl SessionFlag {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::InitialPreroll => INITIAL_PREROLL_FLAG_KEY,
            Self::InitialReward => INITIAL_REWARD_FLAG_KEY,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    fn backend(err: &impl std::error::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Typed access to the tracking record and session flags.
#[derive(Debug, Clone)]
pub struct TrackingStore<S> {
    storage: S,
}

impl<S: SessionStore> TrackingStore<S> {
    pub const fn new(storage: S) -> Self {
        Self { storage }
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Read the record. A payload that does not parse is reported as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be read.
    pub fn get(&self) -> Result<Option<AdCycleTracking>, StoreError> {
        let Some(raw) = self
            .storage
            .get_item(TRACKING_STORAGE_KEY)
            .map_err(|e| StoreError::backend(&e))?
        else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                log::warn!("Discarding malformed ad tracking record: {err}");
                Ok(None)
            }
        }
    }

    /// Merge `patch` onto the current (or default) record and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read, encoded, or written.
    pub fn update(&self, patch: &TrackingPatch) -> Result<AdCycleTracking, StoreError> {
        self.modify(|record| patch.apply(record))
            .map(|(record, ())| record)
    }

    /// Read-modify-write with a closure, returning the stored record and the
    /// closure's result.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read, encoded, or written.
    pub fn modify<R>(
        &self,
        f: impl FnOnce(&mut AdCycleTracking) -> R,
    ) -> Result<(AdCycleTracking, R), StoreError> {
        let mut record = self.get()?.unwrap_or_default();
        let out = f(&mut record);
        self.put(&record)?;
        Ok((record, out))
    }

    /// Create the default record if none is stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn ensure(&self) -> Result<AdCycleTracking, StoreError> {
        if let Some(record) = self.get()? {
            return Ok(record);
        }
        let record = AdCycleTracking::default();
        self.put(&record)?;
        Ok(record)
    }

    /// Delete the record entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.storage
            .remove_item(TRACKING_STORAGE_KEY)
            .map_err(|e| StoreError::backend(&e))
    }

    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn flag(&self, flag: SessionFlag) -> Result<bool, StoreError> {
        let value = self
            .storage
            .get_item(flag.key())
            .map_err(|e| StoreError::backend(&e))?;
        Ok(value.as_deref() == Some(FLAG_SET_VALUE))
    }

    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn set_flag(&self, flag: SessionFlag) -> Result<(), StoreError> {
        self.storage
            .set_item(flag.key(), FLAG_SET_VALUE)
            .map_err(|e| StoreError::backend(&e))
    }

    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn clear_flag(&self, flag: SessionFlag) -> Result<(), StoreError> {
        self.storage
            .remove_item(flag.key())
            .map_err(|e| StoreError::backend(&e))
    }

    fn put(&self, record: &AdCycleTracking) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(record)?;
        self.storage
            .set_item(TRACKING_STORAGE_KEY, &encoded)
            .map_err(|e| StoreError::backend(&e))
    }
}

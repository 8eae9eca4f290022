//! Per-item notification settings.
//!
//! Stored documents hold each item either as a bare boolean (legacy: only the
//! primary alert flag) or as a structured object that may be missing fields.
//! [`normalize`] turns any of those into a complete [`ItemConfig`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::models::{ItemOverrides, ItemSetting, Timing};

pub const DEFAULT_PRIMARY_VOLUME: f64 = 0.5;
pub const DEFAULT_SECONDARY_VOLUME: f64 = 0.3;
pub const MIN_VOLUME: f64 = 0.1;
pub const MAX_VOLUME: f64 = 1.0;
pub const MAX_OFFSET_MINUTES: u32 = 60;
/// Test playback accepts the full range, including silence.
pub const MIN_ACTION_VOLUME: f64 = 0.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{item}: {field} must be between {min} and {max}, got {value}")]
    VolumeOutOfRange { item: String, field: &'static str, value: String, min: f64, max: f64 },
    #[error("{item}: {field} must be at most {max} minutes, got {value}")]
    OffsetOutOfRange { item: String, field: &'static str, value: u32, max: u32 },
    #[error("latitude must be within [-90, 90], got {0}")]
    LatitudeOutOfRange(String),
    #[error("longitude must be within [-180, 180], got {0}")]
    LongitudeOutOfRange(String),
    #[error("nothing to save: the update has no sections")]
    EmptyUpdate,
}

/// Fully populated settings for one schedule item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    pub primary_enabled: bool,
    pub primary_audio_file: Option<String>,
    pub primary_volume: f64,
    pub primary_timing: Timing,
    pub primary_offset_minutes: u32,
    pub secondary_enabled: bool,
    pub secondary_audio_file: Option<String>,
    pub secondary_volume: f64,
    pub secondary_timing: Timing,
    pub secondary_offset_minutes: u32,
    pub enabled_target_devices: BTreeSet<String>,
}

impl Default for ItemConfig {
    fn default() -> Self {
        Self {
            primary_enabled: true,
            primary_audio_file: None,
            primary_volume: DEFAULT_PRIMARY_VOLUME,
            primary_timing: Timing::Before,
            primary_offset_minutes: 0,
            secondary_enabled: false,
            secondary_audio_file: None,
            secondary_volume: DEFAULT_SECONDARY_VOLUME,
            secondary_timing: Timing::Before,
            secondary_offset_minutes: 0,
            enabled_target_devices: BTreeSet::new(),
        }
    }
}

impl ItemConfig {
    /// The primary detail fields are only meaningful while the primary alert is on.
    pub fn primary_editable(&self) -> bool {
        self.primary_enabled
    }

    /// Reminder fields are only meaningful while the reminder is on.
    pub fn secondary_editable(&self) -> bool {
        self.secondary_enabled
    }

    pub fn targets_device(&self, uuid: &str) -> bool {
        self.enabled_target_devices.contains(uuid)
    }

    pub fn set_device(&mut self, uuid: &str, enabled: bool) {
        if enabled {
            self.enabled_target_devices.insert(uuid.to_string());
        } else {
            self.enabled_target_devices.remove(uuid);
        }
    }

    /// Target devices as the list the service expects.
    pub fn target_device_list(&self) -> Vec<String> {
        self.enabled_target_devices.iter().cloned().collect()
    }

    pub fn validate(&self, item: &str) -> Result<(), ValidationError> {
        check_volume(item, "primary volume", self.primary_volume, MIN_VOLUME, MAX_VOLUME)?;
        check_volume(item, "secondary volume", self.secondary_volume, MIN_VOLUME, MAX_VOLUME)?;
        check_offset(item, "primary offset", self.primary_offset_minutes)?;
        check_offset(item, "secondary offset", self.secondary_offset_minutes)?;
        Ok(())
    }
}

pub(crate) fn check_volume(
    item: &str,
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    // NaN fails both comparisons, so it is rejected too.
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ValidationError::VolumeOutOfRange { item: item.to_string(), field, value: value.to_string(), min, max })
    }
}

fn check_offset(item: &str, field: &'static str, value: u32) -> Result<(), ValidationError> {
    if value <= MAX_OFFSET_MINUTES {
        Ok(())
    } else {
        Err(ValidationError::OffsetOutOfRange {
            item: item.to_string(),
            field,
            value,
            max: MAX_OFFSET_MINUTES,
        })
    }
}

/// Upgrades a stored item setting into a complete [`ItemConfig`].
///
/// - `Some(Flag(b))` keeps `b` as the primary flag, everything else defaults.
/// - `None` (absent or null) is an enabled item with defaults.
/// - `Some(Detailed(..))` fills only the fields that are missing; explicit
///   `false` and `0` are kept.
///
/// Normalizing an already normalized config returns it unchanged.
pub fn normalize(raw: Option<&ItemSetting>) -> ItemConfig {
    match raw {
        Some(ItemSetting::Flag(enabled)) => ItemConfig { primary_enabled: *enabled, ..ItemConfig::default() },
        None => ItemConfig::default(),
        Some(ItemSetting::Detailed(overrides)) => normalize_overrides(overrides),
    }
}

fn normalize_overrides(raw: &ItemOverrides) -> ItemConfig {
    let defaults = ItemConfig::default();
    ItemConfig {
        primary_enabled: raw.primary_enabled.unwrap_or(defaults.primary_enabled),
        primary_audio_file: non_empty(&raw.primary_audio_file),
        primary_volume: raw.primary_volume.unwrap_or(defaults.primary_volume),
        primary_timing: raw.primary_timing.unwrap_or(defaults.primary_timing),
        primary_offset_minutes: raw.primary_offset_minutes.unwrap_or(defaults.primary_offset_minutes),
        secondary_enabled: raw.secondary_enabled.unwrap_or(defaults.secondary_enabled),
        secondary_audio_file: non_empty(&raw.secondary_audio_file),
        secondary_volume: raw.secondary_volume.unwrap_or(defaults.secondary_volume),
        secondary_timing: raw.secondary_timing.unwrap_or(defaults.secondary_timing),
        secondary_offset_minutes: raw
            .secondary_offset_minutes
            .unwrap_or(defaults.secondary_offset_minutes),
        enabled_target_devices: raw
            .enabled_target_devices
            .as_ref()
            .map(|devices| devices.iter().cloned().collect())
            .unwrap_or_default(),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.trim().is_empty()).cloned()
}

impl From<ItemConfig> for ItemOverrides {
    fn from(config: ItemConfig) -> Self {
        ItemOverrides {
            primary_enabled: Some(config.primary_enabled),
            primary_audio_file: config.primary_audio_file,
            primary_volume: Some(config.primary_volume),
            primary_timing: Some(config.primary_timing),
            primary_offset_minutes: Some(config.primary_offset_minutes),
            secondary_enabled: Some(config.secondary_enabled),
            secondary_audio_file: config.secondary_audio_file,
            secondary_volume: Some(config.secondary_volume),
            secondary_timing: Some(config.secondary_timing),
            secondary_offset_minutes: Some(config.secondary_offset_minutes),
            enabled_target_devices: Some(config.enabled_target_devices.into_iter().collect()),
        }
    }
}

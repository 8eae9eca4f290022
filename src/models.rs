pub mod serde_helpers;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::settings::ItemConfig;
use serde_helpers::{
    deserialize_non_empty_string, deserialize_optional_timestamp, deserialize_ordered_map,
    deserialize_timestamp_map, serialize_ordered_map,
};

// ===== CONSTANTS =====

/// Daily schedule items in display order.
pub const SCHEDULE_ITEMS: [&str; 6] = ["Fajr", "Sunrise", "Dhuhr", "Asr", "Maghrib", "Isha"];

/// Items that only carry reminders; the primary alert section is hidden for them.
pub const REMINDER_ONLY_ITEMS: [&str; 1] = ["Sunrise"];

pub const DEFAULT_COUNTRY: &str = "United Kingdom";

// ===== ENUMS =====

/// Whether an alert fires before or after the scheduled time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timing {
    #[default]
    Before,
    After,
}

impl From<&str> for Timing {
    fn from(s: &str) -> Self {
        match s {
            "after" => Timing::After,
            _ => Timing::Before,
        }
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timing::Before => f.write_str("before"),
            Timing::After => f.write_str("after"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionStatus {
    Success,
    Failure,
}

// ===== RESPONSE TYPES =====

/// Outcome of a fire-and-report action. `message` is the service's own text,
/// surfaced verbatim: the success message, or the failure detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: ActionStatus,
    pub message: String,
}

impl ActionResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self { status: ActionStatus::Success, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { status: ActionStatus::Failure, message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

/// Body returned by the service for writes and actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMessage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

// ===== STATUS =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextEvent {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoonPhase {
    pub name: String,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Astronomy {
    #[serde(default)]
    pub moon_illumination: Option<f64>,
    #[serde(default)]
    pub moon_image_index: Option<u32>,
    #[serde(default)]
    pub nearest_phase: Option<MoonPhase>,
    #[serde(default)]
    pub sun_altitude: Option<f64>,
    #[serde(default)]
    pub sun_azimuth: Option<f64>,
}

/// Point-in-time copy of the remote status. Never mutated after it is fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(rename = "next_prayer", default)]
    pub next_event: Option<NextEvent>,
    #[serde(rename = "times", default, deserialize_with = "deserialize_timestamp_map")]
    pub events: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub astronomy: Option<Astronomy>,
    #[serde(default)]
    pub hijri_date: Option<String>,
}

impl StatusSnapshot {
    /// Target time of the next event, if the service reported one.
    pub fn next_event_time(&self) -> Option<DateTime<Utc>> {
        self.next_event.as_ref().and_then(|e| e.time)
    }

    /// Events sorted by time, earliest first.
    pub fn events_chronological(&self) -> Vec<(&str, DateTime<Utc>)> {
        let mut events: Vec<(&str, DateTime<Utc>)> =
            self.events.iter().map(|(name, time)| (name.as_str(), *time)).collect();
        events.sort_by_key(|(_, time)| *time);
        events
    }

    pub fn device(&self, uuid: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.uuid == uuid)
    }
}

// ===== CONFIGURATION =====

fn default_calculation_method() -> String {
    "ISNA".to_string()
}

fn default_asr_method() -> String {
    "STANDARD".to_string()
}

fn default_timezone() -> String {
    "Europe/London".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_calculation_method")]
    pub calculation_method: String,
    #[serde(default = "default_asr_method")]
    pub asr_method: String,
    #[serde(default)]
    pub hijri_offset: i32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub high_latitude_rule: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// `None` means a custom location typed in by hand.
    #[serde(default)]
    pub city: Option<String>,
}

impl LocationConfig {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            calculation_method: default_calculation_method(),
            asr_method: default_asr_method(),
            hijri_offset: 0,
            timezone: default_timezone(),
            high_latitude_rule: None,
            country: None,
            city: None,
        }
    }

    pub fn is_custom(&self) -> bool {
        self.city.is_none()
    }
}

/// Structured per-item settings as stored; any field may be missing or null.
///
/// Audio files always serialize (as `null` when unset) so that clearing a file
/// in an update reaches the store instead of being merged away.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemOverrides {
    #[serde(rename = "athan_enabled", default, skip_serializing_if = "Option::is_none")]
    pub primary_enabled: Option<bool>,
    #[serde(rename = "athan_audio_file", default, deserialize_with = "deserialize_non_empty_string")]
    pub primary_audio_file: Option<String>,
    #[serde(rename = "athan_volume", default, skip_serializing_if = "Option::is_none")]
    pub primary_volume: Option<f64>,
    #[serde(rename = "athan_timing", default, skip_serializing_if = "Option::is_none")]
    pub primary_timing: Option<Timing>,
    #[serde(rename = "athan_offset", default, skip_serializing_if = "Option::is_none")]
    pub primary_offset_minutes: Option<u32>,
    #[serde(rename = "reminder_enabled", default, skip_serializing_if = "Option::is_none")]
    pub secondary_enabled: Option<bool>,
    #[serde(rename = "reminder_audio_file", default, deserialize_with = "deserialize_non_empty_string")]
    pub secondary_audio_file: Option<String>,
    #[serde(rename = "reminder_volume", default, skip_serializing_if = "Option::is_none")]
    pub secondary_volume: Option<f64>,
    #[serde(rename = "reminder_timing", default, skip_serializing_if = "Option::is_none")]
    pub secondary_timing: Option<Timing>,
    #[serde(rename = "reminder_offset", default, skip_serializing_if = "Option::is_none")]
    pub secondary_offset_minutes: Option<u32>,
    #[serde(rename = "enabled_devices", default, skip_serializing_if = "Option::is_none")]
    pub enabled_target_devices: Option<Vec<String>>,
}

/// One item's settings as found in a stored document: either the legacy bare
/// boolean or the structured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemSetting {
    Flag(bool),
    Detailed(ItemOverrides),
}

impl From<ItemConfig> for ItemSetting {
    fn from(config: ItemConfig) -> Self {
        ItemSetting::Detailed(config.into())
    }
}

/// The full configuration document held by the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationConfig>,
    #[serde(rename = "prayers", default, skip_serializing_if = "Option::is_none")]
    pub items: Option<BTreeMap<String, Option<ItemSetting>>>,
    /// Sections this client does not edit, kept verbatim.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ConfigDocument {
    /// Raw stored setting for one item; `None` when absent or null.
    pub fn item(&self, name: &str) -> Option<&ItemSetting> {
        self.items.as_ref()?.get(name)?.as_ref()
    }
}

/// A partial document: only the top-level sections being edited. The store merges
/// by key, so an omitted section stays as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationConfig>,
    #[serde(rename = "prayers", skip_serializing_if = "Option::is_none")]
    pub items: Option<BTreeMap<String, ItemSetting>>,
}

impl ConfigUpdate {
    /// Location-only update.
    pub fn location(location: LocationConfig) -> Self {
        Self { location: Some(location), items: None }
    }

    /// Schedule-only update for the given items.
    pub fn schedule<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, ItemConfig)>,
        S: Into<String>,
    {
        let items = items
            .into_iter()
            .map(|(name, config)| (name.into(), ItemSetting::from(config)))
            .collect();
        Self { location: None, items: Some(items) }
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.items.as_ref().map_or(true, |items| items.is_empty())
    }
}

// ===== REFERENCE DATA =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityEntry {
    pub name: String,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
}

impl CityEntry {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self { name: name.into(), latitude, longitude }
    }
}

/// Country -> cities, in the order the service lists them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryCatalog {
    entries: Vec<(String, Vec<CityEntry>)>,
}

impl CountryCatalog {
    pub fn new(entries: Vec<(String, Vec<CityEntry>)>) -> Self {
        Self { entries }
    }

    pub fn cities(&self, country: &str) -> Option<&[CityEntry]> {
        self.entries
            .iter()
            .find(|(name, _)| name == country)
            .map(|(_, cities)| cities.as_slice())
    }

    pub fn contains(&self, country: &str) -> bool {
        self.cities(country).is_some()
    }

    pub fn first_country(&self) -> Option<&str> {
        self.entries.first().map(|(name, _)| name.as_str())
    }

    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'de> Deserialize<'de> for CountryCatalog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_ordered_map(deserializer).map(CountryCatalog::new)
    }
}

impl Serialize for CountryCatalog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_ordered_map(&self.entries, serializer)
    }
}

/// Selectable audio identifiers, passed through to the renderer unmodified.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioAssets {
    pub athan: Vec<String>,
    pub reminders: Vec<String>,
}

impl<'de> Deserialize<'de> for AudioAssets {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum AudioFormat {
            // Older services return a bare list of primary files.
            Legacy(Vec<String>),
            Split {
                #[serde(default)]
                athan: Vec<String>,
                #[serde(default)]
                reminders: Vec<String>,
            },
        }

        Ok(match AudioFormat::deserialize(deserializer)? {
            AudioFormat::Legacy(athan) => AudioAssets { athan, reminders: Vec::new() },
            AudioFormat::Split { athan, reminders } => AudioAssets { athan, reminders },
        })
    }
}

// ===== ACTION REQUESTS =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPrimaryRequest {
    pub prayer_name: String,
    pub athan_audio_file: Option<String>,
    pub volume: Option<f64>,
    pub target_devices: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSecondaryRequest {
    pub prayer_name: String,
    pub minutes: u32,
    pub volume: Option<f64>,
    pub reminder_audio_file: Option<String>,
    pub timing: Timing,
    pub target_devices: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopAudioRequest {
    pub target_devices: Option<Vec<String>>,
}

impl StopAudioRequest {
    /// An empty list means every device.
    pub fn for_devices(devices: Vec<String>) -> Self {
        Self { target_devices: if devices.is_empty() { None } else { Some(devices) } }
    }
}

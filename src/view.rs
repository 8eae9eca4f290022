//! Renderer-facing view state, derived from the synchronized data and nothing else.

use chrono::{DateTime, Utc};

use crate::location::{LocationResolver, LocationSelection};
use crate::models::{
    Astronomy, ConfigDocument, Device, LocationConfig, StatusSnapshot, REMINDER_ONLY_ITEMS,
    SCHEDULE_ITEMS,
};
use crate::settings::{normalize, ItemConfig};

/// Shown in place of the countdown when there is no target.
pub const NO_COUNTDOWN: &str = "--:--:--";

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRow {
    pub name: String,
    pub time: DateTime<Utc>,
    /// This row is the next event.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceToggle {
    pub uuid: String,
    pub name: String,
    pub status: Option<String>,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemPanel {
    pub name: String,
    pub config: ItemConfig,
    /// False for reminder-only items, which have no primary alert section.
    pub show_primary: bool,
    pub primary_editable: bool,
    pub secondary_editable: bool,
    pub devices: Vec<DeviceToggle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationView {
    pub selection: LocationSelection,
    pub stored: Option<LocationConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub next_event: Option<String>,
    pub next_event_time: Option<DateTime<Utc>>,
    pub countdown: String,
    pub hijri_date: Option<String>,
    pub schedule: Vec<ScheduleRow>,
    pub astronomy: Option<Astronomy>,
    pub devices: Vec<Device>,
    pub panels: Vec<ItemPanel>,
    pub location: LocationView,
    /// Soft error from the last status read, if it failed.
    pub status_error: Option<String>,
}

impl DashboardView {
    pub fn panel(&self, name: &str) -> Option<&ItemPanel> {
        self.panels.iter().find(|panel| panel.name == name)
    }
}

/// Builds the complete view state. Pure: equal inputs give equal output.
pub fn build_view(
    config: Option<&ConfigDocument>,
    status: Option<&StatusSnapshot>,
    resolver: &LocationResolver,
    countdown: Option<&str>,
    status_error: Option<String>,
) -> DashboardView {
    let next_name = status.and_then(|s| s.next_event.as_ref()).map(|e| e.name.clone());
    let devices: Vec<Device> = status.map(|s| s.devices.clone()).unwrap_or_default();

    let schedule = status
        .map(|s| {
            s.events_chronological()
                .into_iter()
                .map(|(name, time)| ScheduleRow {
                    name: name.to_string(),
                    time,
                    active: next_name.as_deref() == Some(name),
                })
                .collect()
        })
        .unwrap_or_default();

    let panels = SCHEDULE_ITEMS
        .iter()
        .map(|name| item_panel(name, normalize(config.and_then(|c| c.item(name))), &devices))
        .collect();

    let stored = config.and_then(|c| c.location.clone());

    DashboardView {
        next_event: next_name,
        next_event_time: status.and_then(StatusSnapshot::next_event_time),
        countdown: countdown.unwrap_or(NO_COUNTDOWN).to_string(),
        hijri_date: status.and_then(|s| s.hijri_date.clone()),
        schedule,
        astronomy: status.and_then(|s| s.astronomy.clone()),
        devices,
        panels,
        location: LocationView { selection: resolver.resolve(stored.as_ref()), stored },
        status_error,
    }
}

fn item_panel(name: &str, config: ItemConfig, devices: &[Device]) -> ItemPanel {
    // Only devices the service currently reports get a toggle.
    let toggles = devices
        .iter()
        .map(|device| DeviceToggle {
            uuid: device.uuid.clone(),
            name: device.name.clone(),
            status: device.status.clone(),
            checked: config.targets_device(&device.uuid),
        })
        .collect();

    ItemPanel {
        name: name.to_string(),
        show_primary: !REMINDER_ONLY_ITEMS.contains(&name),
        primary_editable: config.primary_editable(),
        secondary_editable: config.secondary_editable(),
        config,
        devices: toggles,
    }
}

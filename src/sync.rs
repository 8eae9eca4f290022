use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{StatusCache, StatusRead};
use crate::client::{ApiError, DashboardApi};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::countdown::CountdownEngine;
use crate::location::{validate_coordinates, LocationResolver, LocationSelection};
use crate::models::{
    ActionResponse, AudioAssets, ConfigDocument, ConfigUpdate, LocationConfig, ServiceMessage,
    StatusSnapshot, StopAudioRequest, TriggerPrimaryRequest, TriggerSecondaryRequest, SCHEDULE_ITEMS,
};
use crate::settings::{check_volume, normalize, ItemConfig, ValidationError, MAX_VOLUME, MIN_ACTION_VOLUME};
use crate::view::{build_view, DashboardView};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SaveError {
    /// Caught locally; nothing was sent.
    #[error("invalid settings: {0}")]
    Invalid(#[from] ValidationError),
    /// The service refused the write or could not be reached. Local state is unchanged.
    #[error("save failed: {}", .0.user_message())]
    Rejected(ApiError),
}

/// Outcome of a successful save, including how the follow-up reads went.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub message: String,
    /// Set when the config re-fetch after the write failed; the previous document is kept.
    pub config_error: Option<ApiError>,
    pub status: StatusRead,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub failures: Vec<ApiError>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Keeps the local copies of config, status and reference data in step with the
/// service.
pub struct SyncEngine<A: DashboardApi, C: Clock + Clone> {
    api: A,
    status: StatusCache<C>,
    countdown: CountdownEngine<C>,
    config: Option<Arc<ConfigDocument>>,
    resolver: LocationResolver,
    catalog_loaded: bool,
    audio: Arc<AudioAssets>,
    last_status_error: Option<ApiError>,
}

impl<A: DashboardApi> SyncEngine<A, SystemClock> {
    pub fn new(api: A, config: &ClientConfig) -> Self {
        Self::with_clock(api, SystemClock, config.status_ttl)
    }
}

impl<A: DashboardApi, C: Clock + Clone> SyncEngine<A, C> {
    pub fn with_clock(api: A, clock: C, status_ttl: std::time::Duration) -> Self {
        Self {
            api,
            status: StatusCache::new(clock.clone(), status_ttl),
            countdown: CountdownEngine::new(clock),
            config: None,
            resolver: LocationResolver::default(),
            catalog_loaded: false,
            audio: Arc::new(AudioAssets::default()),
            last_status_error: None,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Session start: reference data, config, then status. Failures are collected, not fatal.
    pub async fn load(&mut self) -> LoadReport {
        let mut report = LoadReport::default();

        if let Err(e) = self.ensure_catalog().await {
            report.failures.push(e);
        }
        if let Err(e) = self.refresh_config().await {
            report.failures.push(e);
        }
        if let Some(e) = self.status(false).await.error() {
            report.failures.push(e.clone());
        }

        tracing::info!("Session loaded with {} failure(s)", report.failures.len());
        report
    }

    /// Fetches the country catalog once per session.
    pub async fn ensure_catalog(&mut self) -> Result<(), ApiError> {
        if self.catalog_loaded {
            return Ok(());
        }
        let catalog = self.api.get_countries().await.map_err(|e| {
            tracing::warn!("Failed to load country catalog: {}", e);
            e
        })?;
        tracing::debug!("Loaded {} countries", catalog.countries().count());
        self.resolver = LocationResolver::new(Arc::new(catalog));
        self.catalog_loaded = true;
        Ok(())
    }

    /// Re-reads the config document and the audio lists. A failed config read keeps
    /// the previous document; a failed audio read keeps the previous lists.
    pub async fn refresh_config(&mut self) -> Result<Arc<ConfigDocument>, ApiError> {
        match self.api.get_audio_files().await {
            Ok(audio) => self.audio = Arc::new(audio),
            Err(e) => tracing::warn!("Failed to load audio files: {}", e),
        }

        let document = self.api.get_config().await.map_err(|e| {
            tracing::warn!("Failed to load config, keeping previous copy: {}", e);
            e
        })?;
        let document = Arc::new(document);
        self.config = Some(Arc::clone(&document));
        tracing::info!("Config refreshed");
        Ok(document)
    }

    pub async fn status(&mut self, force_refresh: bool) -> StatusRead {
        let read = self.status.get_status(&self.api, force_refresh).await;
        if let Some(snapshot) = read.snapshot() {
            self.countdown.observe(snapshot);
        }
        self.last_status_error = read.error().cloned();
        read
    }

    /// Validates, writes, then re-reads config and status.
    ///
    /// Only the sections present in `update` are sent; the store keeps the rest.
    /// After a successful write the status cache is invalidated, the config is
    /// re-fetched and status is force-refreshed, in that order. On failure no
    /// cached state changes and nothing is retried.
    pub async fn save(&mut self, update: ConfigUpdate) -> Result<SaveReport, SaveError> {
        validate_update(&update)?;

        let response = self.api.post_config(&update).await.map_err(|e| {
            tracing::warn!("Config save failed: {}", e);
            SaveError::Rejected(e)
        })?;
        if let Some(detail) = service_failure(&response) {
            tracing::warn!("Config save refused: {}", detail);
            return Err(SaveError::Rejected(ApiError::Rejected {
                endpoint: "config".to_string(),
                status: 200,
                detail,
            }));
        }

        let message = response.message.unwrap_or_else(|| "Settings saved".to_string());
        tracing::info!("Config saved: {}", message);

        self.status.invalidate();
        let config_error = self.refresh_config().await.err();
        let status = self.status(true).await;

        Ok(SaveReport { message, config_error, status })
    }

    /// Saves the location section only.
    pub async fn save_location(&mut self, location: LocationConfig) -> Result<SaveReport, SaveError> {
        self.save(ConfigUpdate::location(location)).await
    }

    pub async fn save_items<I, S>(&mut self, items: I) -> Result<SaveReport, SaveError>
    where
        I: IntoIterator<Item = (S, ItemConfig)>,
        S: Into<String>,
    {
        self.save(ConfigUpdate::schedule(items)).await
    }

    pub fn config(&self) -> Option<Arc<ConfigDocument>> {
        self.config.clone()
    }

    pub fn location(&self) -> Option<&LocationConfig> {
        self.config.as_ref()?.location.as_ref()
    }

    pub fn item_config(&self, name: &str) -> ItemConfig {
        normalize(self.config.as_ref().and_then(|doc| doc.item(name)))
    }

    /// Every schedule item, in display order.
    pub fn item_configs(&self) -> Vec<(String, ItemConfig)> {
        SCHEDULE_ITEMS.iter().map(|name| (name.to_string(), self.item_config(name))).collect()
    }

    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }

    pub fn location_selection(&self) -> LocationSelection {
        self.resolver.resolve(self.location())
    }

    pub fn audio_assets(&self) -> Arc<AudioAssets> {
        Arc::clone(&self.audio)
    }

    pub fn status_snapshot(&self) -> Option<Arc<StatusSnapshot>> {
        self.status.snapshot()
    }

    /// A handle on the engine's time source, for countdowns kept elsewhere.
    pub fn clock(&self) -> C {
        self.countdown.clock().clone()
    }

    pub fn countdown_target(&self) -> Option<DateTime<Utc>> {
        self.countdown.target()
    }

    pub fn tick_countdown(&mut self) -> Option<String> {
        self.countdown.tick().map(str::to_string)
    }

    pub fn view(&self) -> DashboardView {
        let snapshot = self.status.snapshot();
        build_view(
            self.config.as_deref(),
            snapshot.as_deref(),
            &self.resolver,
            self.countdown.display(),
            self.last_status_error.as_ref().map(ApiError::user_message),
        )
    }

    /// Plays the item's primary alert now on its target devices.
    pub async fn trigger_primary(&self, item: &str, config: &ItemConfig) -> ActionResponse {
        if let Err(e) = check_volume(item, "volume", config.primary_volume, MIN_ACTION_VOLUME, MAX_VOLUME) {
            return ActionResponse::failure(e.to_string());
        }
        let request = TriggerPrimaryRequest {
            prayer_name: item.to_string(),
            athan_audio_file: config.primary_audio_file.clone(),
            volume: Some(config.primary_volume),
            target_devices: Some(config.target_device_list()),
        };
        tracing::info!("Test play for {}", item);
        report_action(self.api.trigger_primary(&request).await)
    }

    /// Plays the item's reminder now, as configured.
    pub async fn trigger_secondary(&self, item: &str, config: &ItemConfig) -> ActionResponse {
        if let Err(e) = check_volume(item, "volume", config.secondary_volume, MIN_ACTION_VOLUME, MAX_VOLUME) {
            return ActionResponse::failure(e.to_string());
        }
        let request = TriggerSecondaryRequest {
            prayer_name: item.to_string(),
            minutes: config.secondary_offset_minutes,
            volume: Some(config.secondary_volume),
            reminder_audio_file: config.secondary_audio_file.clone(),
            timing: config.secondary_timing,
            target_devices: Some(config.target_device_list()),
        };
        tracing::info!("Test reminder for {}", item);
        report_action(self.api.trigger_secondary(&request).await)
    }

    /// Stops playback on the given devices, or everywhere when the list is empty.
    pub async fn stop_audio(&self, devices: Vec<String>) -> ActionResponse {
        let request = StopAudioRequest::for_devices(devices);
        tracing::info!("Stopping audio on {:?}", request.target_devices);
        report_action(self.api.stop_audio(&request).await)
    }
}

/// Checks an update before anything is sent.
pub fn validate_update(update: &ConfigUpdate) -> Result<(), ValidationError> {
    if update.is_empty() {
        return Err(ValidationError::EmptyUpdate);
    }
    if let Some(location) = &update.location {
        validate_coordinates(location)?;
    }
    if let Some(items) = &update.items {
        for (name, setting) in items {
            normalize(Some(setting)).validate(name)?;
        }
    }
    Ok(())
}

/// A 2xx body can still carry an error status.
fn service_failure(response: &ServiceMessage) -> Option<String> {
    match response.status.as_deref() {
        Some("error") => Some(
            response
                .detail
                .clone()
                .or_else(|| response.message.clone())
                .unwrap_or_else(|| "Request failed".to_string()),
        ),
        _ => None,
    }
}

fn report_action(result: Result<ServiceMessage, ApiError>) -> ActionResponse {
    match result {
        Ok(response) => match service_failure(&response) {
            Some(detail) => ActionResponse::failure(detail),
            None => ActionResponse::success(response.message.unwrap_or_default()),
        },
        Err(e) => {
            tracing::warn!("Action failed: {}", e);
            ActionResponse::failure(e.user_message())
        }
    }
}

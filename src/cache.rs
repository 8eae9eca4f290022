//! Time-bounded cache of the service status.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::client::{ApiError, DashboardApi};
use crate::clock::Clock;
use crate::config::DEFAULT_STATUS_TTL_MS;
use crate::models::StatusSnapshot;

/// Result of a status read. Fetch failures are never fatal: the caller gets the
/// last good snapshot when there is one.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusRead {
    /// Served from memory, no request made.
    Cached(Arc<StatusSnapshot>),
    Fetched(Arc<StatusSnapshot>),
    /// The fetch failed; this is the previous snapshot.
    Stale { snapshot: Arc<StatusSnapshot>, error: ApiError },
    /// The fetch failed and nothing was ever fetched.
    Unavailable(ApiError),
}

impl StatusRead {
    pub fn snapshot(&self) -> Option<&Arc<StatusSnapshot>> {
        match self {
            StatusRead::Cached(snapshot)
            | StatusRead::Fetched(snapshot)
            | StatusRead::Stale { snapshot, .. } => Some(snapshot),
            StatusRead::Unavailable(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            StatusRead::Stale { error, .. } | StatusRead::Unavailable(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_network_hit(&self) -> bool {
        !matches!(self, StatusRead::Cached(_))
    }
}

pub struct StatusCache<C: Clock> {
    clock: C,
    ttl: chrono::Duration,
    snapshot: Option<Arc<StatusSnapshot>>,
    last_fetch: Option<DateTime<Utc>>,
}

impl<C: Clock> StatusCache<C> {
    pub fn new(clock: C, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(DEFAULT_STATUS_TTL_MS as i64));
        Self { clock, ttl, snapshot: None, last_fetch: None }
    }

    pub fn with_default_ttl(clock: C) -> Self {
        Self::new(clock, Duration::from_millis(DEFAULT_STATUS_TTL_MS))
    }

    /// Returns the cached snapshot while it is younger than the TTL, otherwise
    /// fetches. `force_refresh` always fetches. A snapshot's age counts from when
    /// its request was issued, so request latency does not stretch the window.
    pub async fn get_status<A>(&mut self, api: &A, force_refresh: bool) -> StatusRead
    where
        A: DashboardApi + ?Sized,
    {
        let now = self.clock.now();

        if !force_refresh {
            if let (Some(snapshot), Some(last_fetch)) = (&self.snapshot, self.last_fetch) {
                if now - last_fetch < self.ttl {
                    tracing::debug!("Status cache hit ({}s old)", (now - last_fetch).num_seconds());
                    return StatusRead::Cached(Arc::clone(snapshot));
                }
            }
        }

        match api.get_status().await {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                self.snapshot = Some(Arc::clone(&fresh));
                self.last_fetch = Some(now);
                tracing::debug!(
                    "Fetched status: next event {:?}, {} devices",
                    fresh.next_event.as_ref().map(|e| e.name.as_str()),
                    fresh.devices.len()
                );
                StatusRead::Fetched(fresh)
            }
            Err(error) => match &self.snapshot {
                Some(previous) => {
                    tracing::warn!("Status refresh failed, keeping previous snapshot: {}", error);
                    StatusRead::Stale { snapshot: Arc::clone(previous), error }
                }
                None => {
                    tracing::warn!("Status unavailable: {}", error);
                    StatusRead::Unavailable(error)
                }
            },
        }
    }

    /// Forces the next read to go to the network. The snapshot stays readable.
    pub fn invalidate(&mut self) {
        self.last_fetch = None;
    }

    pub fn snapshot(&self) -> Option<Arc<StatusSnapshot>> {
        self.snapshot.clone()
    }

    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.last_fetch
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{
        AudioAssets, ConfigDocument, ConfigUpdate, CountryCatalog, NextEvent, ServiceMessage,
        StopAudioRequest, TriggerPrimaryRequest, TriggerSecondaryRequest,
    };
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StatusOnlyApi {
        calls: AtomicUsize,
        failing: AtomicBool,
        /// Moves the clock forward while a request is in flight.
        latency: Mutex<Option<(ManualClock, chrono::Duration)>>,
    }

    impl StatusOnlyApi {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn set_latency(&self, clock: &ManualClock, latency: chrono::Duration) {
            *self.latency.lock().unwrap() = Some((clock.clone(), latency));
        }
    }

    fn offline(endpoint: &str) -> ApiError {
        ApiError::Unavailable { endpoint: endpoint.to_string(), reason: "offline".to_string() }
    }

    #[async_trait]
    impl DashboardApi for StatusOnlyApi {
        async fn get_status(&self) -> Result<StatusSnapshot, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let latency = self.latency.lock().unwrap().clone();
            if let Some((clock, by)) = latency {
                clock.advance(by);
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(offline("status"));
            }
            Ok(StatusSnapshot {
                next_event: Some(NextEvent { name: format!("fetch-{}", n), time: None }),
                ..Default::default()
            })
        }

        async fn get_config(&self) -> Result<ConfigDocument, ApiError> {
            Err(offline("config"))
        }

        async fn get_countries(&self) -> Result<CountryCatalog, ApiError> {
            Err(offline("countries"))
        }

        async fn get_audio_files(&self) -> Result<AudioAssets, ApiError> {
            Err(offline("audio-files"))
        }

        async fn post_config(&self, _: &ConfigUpdate) -> Result<ServiceMessage, ApiError> {
            Err(offline("config"))
        }

        async fn trigger_primary(&self, _: &TriggerPrimaryRequest) -> Result<ServiceMessage, ApiError> {
            Err(offline("test-play"))
        }

        async fn trigger_secondary(&self, _: &TriggerSecondaryRequest) -> Result<ServiceMessage, ApiError> {
            Err(offline("test-reminder"))
        }

        async fn stop_audio(&self, _: &StopAudioRequest) -> Result<ServiceMessage, ApiError> {
            Err(offline("stop-audio"))
        }
    }

    fn setup() -> (ManualClock, StatusCache<ManualClock>, StatusOnlyApi) {
        let clock = ManualClock::new(DateTime::from_timestamp(1_741_770_000, 0).unwrap());
        let cache = StatusCache::with_default_ttl(clock.clone());
        (clock, cache, StatusOnlyApi::default())
    }

    fn event_name(read: &StatusRead) -> String {
        read.snapshot().unwrap().next_event.as_ref().unwrap().name.clone()
    }

    #[tokio::test]
    async fn read_within_ttl_makes_no_request() {
        let (clock, mut cache, api) = setup();
        let first = cache.get_status(&api, false).await;
        assert!(matches!(first, StatusRead::Fetched(_)));

        clock.advance(chrono::Duration::seconds(30));
        let read = cache.get_status(&api, false).await;
        assert!(matches!(read, StatusRead::Cached(_)));
        assert!(Arc::ptr_eq(first.snapshot().unwrap(), read.snapshot().unwrap()));
        assert_eq!(event_name(&read), "fetch-1");
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn slow_fetch_does_not_stretch_the_poll_cadence() {
        let (clock, mut cache, api) = setup();
        api.set_latency(&clock, chrono::Duration::milliseconds(200));

        let mut hits = Vec::new();
        for _ in 0..5 {
            hits.push(cache.get_status(&api, false).await.is_network_hit());
            // The next poll is due one TTL after this one started.
            clock.advance(chrono::Duration::seconds(60) - chrono::Duration::milliseconds(200));
        }
        assert_eq!(hits, vec![true; 5]);
        assert_eq!(api.calls(), 5);
    }

    #[tokio::test]
    async fn ttl_boundary_triggers_fetch() {
        let (clock, mut cache, api) = setup();
        cache.get_status(&api, false).await;

        clock.advance(chrono::Duration::milliseconds(59_999));
        assert!(!cache.get_status(&api, false).await.is_network_hit());

        clock.advance(chrono::Duration::milliseconds(1));
        let read = cache.get_status(&api, false).await;
        assert!(matches!(read, StatusRead::Fetched(_)));
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn force_refresh_always_fetches() {
        let (_clock, mut cache, api) = setup();
        cache.get_status(&api, false).await;
        let read = cache.get_status(&api, true).await;
        assert_eq!(event_name(&read), "fetch-2");
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_next_fetch_but_keeps_snapshot() {
        let (_clock, mut cache, api) = setup();
        cache.get_status(&api, false).await;
        cache.invalidate();
        assert!(cache.last_fetch().is_none());
        assert!(cache.snapshot().is_some());

        cache.get_status(&api, false).await;
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_serves_previous_snapshot() {
        let (clock, mut cache, api) = setup();
        cache.get_status(&api, false).await;
        let fetched_at = cache.last_fetch();

        api.set_failing(true);
        clock.advance(chrono::Duration::minutes(5));
        let read = cache.get_status(&api, false).await;
        match &read {
            StatusRead::Stale { snapshot, error } => {
                assert_eq!(snapshot.next_event.as_ref().unwrap().name, "fetch-1");
                assert!(matches!(error, ApiError::Unavailable { .. }));
            }
            other => panic!("expected stale read, got {:?}", other),
        }
        assert_eq!(cache.last_fetch(), fetched_at);
    }

    #[tokio::test]
    async fn cold_failure_is_unavailable() {
        let (_clock, mut cache, api) = setup();
        api.set_failing(true);
        let read = cache.get_status(&api, false).await;
        assert!(matches!(read, StatusRead::Unavailable(_)));
        assert!(read.snapshot().is_none());
        assert!(read.error().is_some());
    }

    proptest! {
        #[test]
        fn reads_inside_the_window_share_one_snapshot(offset_ms in 0i64..60_000) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let (clock, mut cache, api) = setup();
                let first = cache.get_status(&api, false).await;

                clock.advance(chrono::Duration::milliseconds(offset_ms));
                let second = cache.get_status(&api, false).await;

                assert!(matches!(second, StatusRead::Cached(_)));
                assert!(Arc::ptr_eq(first.snapshot().unwrap(), second.snapshot().unwrap()));
                assert_eq!(api.calls(), 1);
            });
        }

        #[test]
        fn reads_past_the_window_fetch_again(offset_ms in 60_000i64..600_000) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let (clock, mut cache, api) = setup();
                cache.get_status(&api, false).await;

                clock.advance(chrono::Duration::milliseconds(offset_ms));
                assert!(matches!(cache.get_status(&api, false).await, StatusRead::Fetched(_)));
                assert_eq!(api.calls(), 2);
            });
        }
    }
}

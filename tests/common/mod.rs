//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value};
use trackline::{
    DrawnRoute, FeatureQuery, GpsPoint, MatchService, PersistenceSink, PositionEvent,
    PositionSender, PositionSource, RecordedTrack, RenderedFeature, Result, SubscriptionHandle,
    TrackError,
};

/// Route `log` output to the test harness; `RUST_LOG=debug` shows it.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

pub fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}

/// Latitude offset (degrees) that is `meters` along a meridian.
pub fn meters_north(meters: f64) -> f64 {
    (meters / trackline::geo_utils::EARTH_RADIUS_M).to_degrees()
}

// ============================================================================
// Position source
// ============================================================================

/// Position source the test drives by hand.
#[derive(Default)]
pub struct ManualPositionSource {
    senders: Mutex<Vec<(SubscriptionHandle, PositionSender)>>,
    next_handle: AtomicUsize,
    pub refuse: bool,
}

impl ManualPositionSource {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn emit(&self, event: PositionEvent) {
        for (_, sender) in self.senders.lock().unwrap().iter() {
            let _ = sender.send(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

impl PositionSource for ManualPositionSource {
    fn subscribe(&self, sender: PositionSender) -> Result<SubscriptionHandle> {
        if self.refuse {
            return Err(TrackError::SensorUnavailable);
        }
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) as u64);
        self.senders.lock().unwrap().push((handle, sender));
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.senders.lock().unwrap().retain(|(h, _)| *h != handle);
    }
}

// ============================================================================
// Matching service
// ============================================================================

/// Answers from a table keyed by the segment's start anchor; anything
/// missing is a 503.
#[derive(Default)]
pub struct ScriptedMatcher {
    answers: HashMap<String, Result<Vec<GpsPoint>>>,
    delays: HashMap<String, Duration>,
    pub calls: AtomicUsize,
}

fn key(p: &GpsPoint) -> String {
    format!("{:.6},{:.6}", p.latitude, p.longitude)
}

impl ScriptedMatcher {
    pub fn answer(mut self, start: GpsPoint, result: Result<Vec<GpsPoint>>) -> Self {
        self.answers.insert(key(&start), result);
        self
    }

    pub fn delay(mut self, start: GpsPoint, delay: Duration) -> Self {
        self.delays.insert(key(&start), delay);
        self
    }
}

impl MatchService for ScriptedMatcher {
    async fn match_segment(&self, start: GpsPoint, _end: GpsPoint) -> Result<Vec<GpsPoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&key(&start)) {
            tokio::time::sleep(*delay).await;
        }
        self.answers
            .get(&key(&start))
            .cloned()
            .unwrap_or(Err(TrackError::MatchingServiceFailure {
                message: "HTTP 503".to_string(),
                status_code: Some(503),
            }))
    }
}

/// Every request fails.
pub struct FailingMatcher;

impl MatchService for FailingMatcher {
    async fn match_segment(&self, _start: GpsPoint, _end: GpsPoint) -> Result<Vec<GpsPoint>> {
        Err(TrackError::MatchingServiceFailure {
            message: "timed out".to_string(),
            status_code: None,
        })
    }
}

/// Echoes the anchors with a midpoint in between.
pub struct MidpointMatcher;

impl MatchService for MidpointMatcher {
    async fn match_segment(&self, start: GpsPoint, end: GpsPoint) -> Result<Vec<GpsPoint>> {
        let mid = GpsPoint::new(
            (start.latitude + end.latitude) / 2.0,
            (start.longitude + end.longitude) / 2.0,
        );
        Ok(vec![start, mid, end])
    }
}

// ============================================================================
// Renderer
// ============================================================================

/// Renderer returning a fixed feature list, filtered by layer.
#[derive(Default)]
pub struct FakeRenderer {
    features: Mutex<Vec<RenderedFeature>>,
    pub queries: AtomicUsize,
}

impl FakeRenderer {
    pub fn with_features(features: Vec<RenderedFeature>) -> Self {
        Self {
            features: Mutex::new(features),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set_features(&self, features: Vec<RenderedFeature>) {
        *self.features.lock().unwrap() = features;
    }
}

impl FeatureQuery for FakeRenderer {
    fn query_rendered_features(&self, layer_ids: &[String]) -> Vec<RenderedFeature> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.features
            .lock()
            .unwrap()
            .iter()
            .filter(|f| layer_ids.contains(&f.layer_id))
            .cloned()
            .collect()
    }
}

pub fn feature(layer: &str, id: Value) -> RenderedFeature {
    let mut properties = Map::new();
    properties.insert("id".to_string(), id);
    properties.insert("name".to_string(), Value::String(format!("{} feature", layer)));
    RenderedFeature::new(layer, properties)
}

// ============================================================================
// Persistence
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    pub tracks: Mutex<Vec<RecordedTrack>>,
    pub routes: Mutex<Vec<DrawnRoute>>,
}

impl PersistenceSink for MemoryStore {
    fn save_track(&self, track: RecordedTrack) -> Result<()> {
        self.tracks.lock().unwrap().push(track);
        Ok(())
    }

    fn save_route(&self, route: DrawnRoute) -> Result<()> {
        self.routes.lock().unwrap().push(route);
        Ok(())
    }
}

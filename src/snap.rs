//! # Route Snap Pipeline
//!
//! Turns an ordered list of user-placed anchors into a path that follows the
//! trail network, one matching request per consecutive anchor pair.
//!
//! A failed request (error status, malformed payload, timeout) is not an
//! abort condition: that pair contributes the straight segment between its
//! two anchors instead. Results are spliced in anchor order, consecutive
//! duplicates are removed and the geodesic length is computed.
//!
//! Each run is tagged with a generation. Starting a newer run or calling
//! [`RouteSnapPipeline::cancel`] makes older in-flight runs return
//! [`TrackError::Cancelled`] instead of a path.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::geo_utils::{dedup_consecutive, polyline_length, COORD_EPSILON};
use crate::{codec, Bounds, GpsPoint};

/// Minimum number of anchors needed to draw a route.
pub const MIN_ANCHORS: usize = 2;

/// External path-matching capability.
///
/// Returns the matched coordinate sequence between two anchors, or a
/// `MatchingServiceFailure` / `MatchingServiceMalformedResponse`.
pub trait MatchService: Send + Sync {
    fn match_segment(
        &self,
        start: GpsPoint,
        end: GpsPoint,
    ) -> impl Future<Output = Result<Vec<GpsPoint>>> + Send;
}

impl<T: MatchService> MatchService for Arc<T> {
    fn match_segment(
        &self,
        start: GpsPoint,
        end: GpsPoint,
    ) -> impl Future<Output = Result<Vec<GpsPoint>>> + Send {
        (**self).match_segment(start, end)
    }
}

/// Configuration for route snapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    /// Tolerance (degrees) under which consecutive coordinates are duplicates.
    /// Default: 1e-7 (about 1cm)
    pub dedup_epsilon: f64,

    /// Issue all pair requests at once instead of one after another.
    /// Output order is the same either way. Default: false
    pub concurrent: bool,

    /// Per-segment deadline in milliseconds, on top of whatever the service
    /// enforces. Needs a tokio runtime with the time driver. Default: None
    pub segment_timeout_ms: Option<u64>,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            dedup_epsilon: COORD_EPSILON,
            concurrent: false,
            segment_timeout_ms: None,
        }
    }
}

/// Output of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnappedPath {
    /// Deduplicated path in anchor traversal order
    pub geometry: Vec<GpsPoint>,
    /// Geodesic length in meters
    pub distance: f64,
    /// Anchor pairs the service matched
    pub matched_segments: u32,
    /// Anchor pairs that fell back to a straight segment
    pub fallback_segments: u32,
}

impl SnappedPath {
    /// Whether any segment fell back to a straight line.
    pub fn is_degraded(&self) -> bool {
        self.fallback_segments > 0
    }
}

/// A finished user-drawn route, handed to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawnRoute {
    pub id: String,
    pub name: String,
    pub geometry: Vec<GpsPoint>,
    /// Length in meters
    pub distance: f64,
    /// Unix timestamp (milliseconds)
    pub created_at: i64,
}

impl DrawnRoute {
    /// Wrap a snapped path with caller-assigned identity.
    pub fn from_path(id: &str, name: &str, path: SnappedPath, created_at: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            geometry: path.geometry,
            distance: path.distance,
            created_at,
        }
    }

    pub fn encoded_geometry(&self) -> Result<String> {
        codec::encode(&self.geometry)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.geometry)
    }
}

/// Cloneable handle that cancels whatever run is in flight.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    generation: Arc<AtomicU64>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Snaps anchor sequences through a [`MatchService`].
pub struct RouteSnapPipeline<M: MatchService> {
    service: M,
    config: SnapConfig,
    generation: Arc<AtomicU64>,
}

impl<M: MatchService> RouteSnapPipeline<M> {
    pub fn new(service: M) -> Self {
        Self::with_config(service, SnapConfig::default())
    }

    pub fn with_config(service: M, config: SnapConfig) -> Self {
        Self {
            service,
            config,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    pub fn service(&self) -> &M {
        &self.service
    }

    /// Cancel the run in flight, if any. Its result will be discarded.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            generation: Arc::clone(&self.generation),
        }
    }

    /// Snap an anchor sequence into a path.
    ///
    /// Fails with `InvalidInput` for fewer than two anchors, with
    /// `InvalidAnchor` for a non-finite or out-of-range anchor (before any
    /// request is made) and with `Cancelled` when a newer run or a cancel
    /// superseded this one.
    /// Segment failures never fail the run.
    pub async fn snap(&self, anchors: &[GpsPoint]) -> Result<SnappedPath> {
        if anchors.len() < MIN_ANCHORS {
            return Err(TrackError::InvalidInput {
                anchor_count: anchors.len(),
                minimum_required: MIN_ANCHORS,
            });
        }
        if let Some((index, bad)) = anchors.iter().enumerate().find(|(_, p)| !p.is_valid()) {
            return Err(TrackError::InvalidAnchor {
                index,
                latitude: bad.latitude,
                longitude: bad.longitude,
            });
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();
        let pairs: Vec<(GpsPoint, GpsPoint)> = anchors.windows(2).map(|w| (w[0], w[1])).collect();

        debug!(
            "[RouteSnap] Run {}: matching {} segments ({})",
            generation,
            pairs.len(),
            if self.config.concurrent { "concurrent" } else { "sequential" }
        );

        let outcomes: Vec<Result<Vec<GpsPoint>>> = if self.config.concurrent {
            let outcomes = join_all(pairs.iter().map(|&(a, b)| self.request_segment(a, b))).await;
            self.ensure_current(generation)?;
            outcomes
        } else {
            let mut outcomes = Vec::with_capacity(pairs.len());
            for &(a, b) in &pairs {
                let outcome = self.request_segment(a, b).await;
                self.ensure_current(generation)?;
                outcomes.push(outcome);
            }
            outcomes
        };

        let path = assemble_path(&pairs, outcomes, self.config.dedup_epsilon);

        info!(
            "[RouteSnap] Snapped {} anchors: {}/{} segments matched, {} points, {:.0}m in {:.2}s",
            anchors.len(),
            path.matched_segments,
            pairs.len(),
            path.geometry.len(),
            path.distance,
            start.elapsed().as_secs_f64()
        );

        Ok(path)
    }

    async fn request_segment(&self, start: GpsPoint, end: GpsPoint) -> Result<Vec<GpsPoint>> {
        let request = self.service.match_segment(start, end);
        let matched = match self.config.segment_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), request)
                .await
                .map_err(|_| TrackError::MatchingServiceFailure {
                    message: format!("timed out after {}ms", ms),
                    status_code: None,
                })?,
            None => request.await,
        }?;

        if matched.is_empty() {
            return Err(TrackError::MatchingServiceMalformedResponse {
                message: "empty geometry".to_string(),
            });
        }
        if let Some(bad) = matched.iter().find(|p| !p.is_valid()) {
            return Err(TrackError::MatchingServiceMalformedResponse {
                message: format!("invalid coordinate ({}, {})", bad.latitude, bad.longitude),
            });
        }
        Ok(matched)
    }

    fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("[RouteSnap] Run {} superseded, discarding results", generation);
            return Err(TrackError::Cancelled);
        }
        Ok(())
    }
}

/// Splice per-pair outcomes in pair order, substituting the straight segment
/// for every failure, then dedup and measure.
fn assemble_path(
    pairs: &[(GpsPoint, GpsPoint)],
    outcomes: Vec<Result<Vec<GpsPoint>>>,
    epsilon: f64,
) -> SnappedPath {
    let mut raw: Vec<GpsPoint> = Vec::new();
    let mut matched_segments = 0;
    let mut fallback_segments = 0;

    for (i, (&(a, b), outcome)) in pairs.iter().zip(outcomes).enumerate() {
        match outcome {
            Ok(points) => {
                matched_segments += 1;
                raw.extend(points);
            }
            Err(e) => {
                fallback_segments += 1;
                warn!("[RouteSnap] Segment {} falling back to straight line: {}", i, e);
                raw.push(a);
                raw.push(b);
            }
        }
    }

    let geometry = dedup_consecutive(raw, epsilon);
    let distance = polyline_length(&geometry);

    SnappedPath {
        geometry,
        distance,
        matched_segments,
        fallback_segments,
    }
}

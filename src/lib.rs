//! # Trackline
//!
//! Geospatial track processing for outdoor map viewers.
//!
//! This library provides:
//! - Live GPS recording with distance, elapsed time and speed accumulation
//! - Route snapping: stitching user-placed anchors into a matched path via an
//!   external map-matching service, falling back to straight segments
//! - Viewport visibility indexing with atomic, latest-wins publication
//! - A 5-digit encoded polyline codec and axis-order helpers
//!
//! ## Features
//!
//! - **`http`** - Enable the HTTP client for a Mapbox/OSRM-style matching service
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trackline::{GpsPoint, codec};
//!
//! let path = vec![
//!     GpsPoint::new(60.0, 10.0),
//!     GpsPoint::new(60.005, 10.005),
//!     GpsPoint::new(60.01, 10.01),
//! ];
//!
//! let encoded = codec::encode(&path).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.len(), 3);
//!
//! let length = trackline::geo_utils::polyline_length(&path);
//! assert!(length > 2_000.0);
//! ```

use geo::Coord;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackError};

// Geographic utilities (distance, bounds, coordinate equality)
pub mod geo_utils;

// Encoded polyline codec and axis-order conversions
pub mod codec;

// Live GPS recording
pub mod recorder;
pub use recorder::{
    LiveTrackRecorder, PositionEvent, PositionSender, PositionSource, RecordedTrack,
    RecorderState, SubscriptionHandle, Track,
};

// Route snapping through an external matching service
pub mod snap;
pub use snap::{
    CancelHandle, DrawnRoute, MatchService, RouteSnapPipeline, SnapConfig, SnappedPath,
};

// Viewport visibility indexing
pub mod visibility;
pub use visibility::{
    FeatureQuery, LayerGroup, RefreshTicket, RenderedFeature, RendererEvent, StableId,
    VisibilityConfig, VisibilityIndex, VisibleSet,
};

// Host-facing session tying the components together
pub mod session;
pub use session::{MapContext, MapSession, PersistenceSink, SessionConfig};

// HTTP matching service
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpMatchConfig, HttpMatchService};

/// Initialize logging for Android hosts.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("TracklineRust"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms, the host installs its own logger
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use trackline::GpsPoint;
/// let point = GpsPoint::new(61.6367, 8.3125); // Galdhøpiggen
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Geometry-order coordinate (x = longitude, y = latitude).
    pub fn to_coord(&self) -> Coord<f64> {
        Coord {
            x: self.longitude,
            y: self.latitude,
        }
    }

    pub fn from_coord(coord: Coord<f64>) -> Self {
        Self::new(coord.y, coord.x)
    }
}

impl From<&Position> for GpsPoint {
    fn from(position: &Position) -> Self {
        GpsPoint::new(position.latitude, position.longitude)
    }
}

/// Bounding box of a track or route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// A single fix from the position sensor.
///
/// Immutable once captured. `timestamp` is Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters, if the sensor reports one
    pub altitude: Option<f64>,
    /// Horizontal accuracy radius in meters
    pub accuracy: f64,
    /// Sensor-reported ground speed in m/s
    pub speed: Option<f64>,
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
}

impl Position {
    /// A fix with only a location and timestamp (no altitude, no speed).
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: 0.0,
            speed: None,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::from(self)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Geographic utilities: distances, path length and coordinate equality.
//!
//! Bounding boxes live on [`crate::Bounds`].

use crate::GpsPoint;

/// Mean Earth radius used for all great-circle distances, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default tolerance for treating two coordinates as the same point (degrees).
///
/// About 1cm at the equator. Matching services echo anchors with float
/// jitter far below this.
pub const COORD_EPSILON: f64 = 1e-7;

/// Great-circle distance between two GPS points in meters (haversine formula).
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lng = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Geodesic length of a path: sum of consecutive great-circle distances.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Whether two coordinates are equal within `epsilon` degrees on both axes.
#[inline]
pub fn points_equal(a: &GpsPoint, b: &GpsPoint, epsilon: f64) -> bool {
    (a.latitude - b.latitude).abs() <= epsilon && (a.longitude - b.longitude).abs() <= epsilon
}

/// Remove every point equal (within `epsilon`) to its immediate predecessor.
///
/// Order is preserved and the first occurrence of each run is kept. The
/// comparison is against the last *kept* point, so a slow drift of
/// sub-epsilon steps cannot collapse a long run into one point.
pub fn dedup_consecutive(points: Vec<GpsPoint>, epsilon: f64) -> Vec<GpsPoint> {
    let mut result: Vec<GpsPoint> = Vec::with_capacity(points.len());
    for point in points {
        match result.last() {
            Some(last) if points_equal(last, &point, epsilon) => {}
            _ => result.push(point),
        }
    }
    result
}

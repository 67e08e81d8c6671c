//! Encoded-path codec and axis-order conversions.
//!
//! Paths travel as standard 5-digit encoded polylines, the same format the
//! matching service and the renderer use. Storage keeps coordinates
//! latitude-first (`[lat, lng]`), geometry keeps them longitude-first
//! (`[lng, lat]`, GeoJSON / `geo::Coord` order).

use geo::{Coord, LineString};

use crate::error::{Result, TrackError};
use crate::GpsPoint;

/// Decimal digits kept by the encoded polyline format.
pub const POLYLINE_PRECISION: u32 = 5;

/// Encode an ordered coordinate sequence as a 5-digit polyline.
pub fn encode(points: &[GpsPoint]) -> Result<String> {
    polyline::encode_coordinates(points.iter().map(|p| p.to_coord()), POLYLINE_PRECISION)
        .map_err(|e| TrackError::Codec {
            message: e.to_string(),
        })
}

/// Decode a 5-digit polyline back into coordinates.
pub fn decode(encoded: &str) -> Result<Vec<GpsPoint>> {
    let line = polyline::decode_polyline(encoded, POLYLINE_PRECISION).map_err(|e| {
        TrackError::Codec {
            message: e.to_string(),
        }
    })?;
    Ok(from_line_string(&line))
}

/// Swap the two axes of every pair. Applying it twice is the identity.
pub fn swap_axes(pairs: &[[f64; 2]]) -> Vec<[f64; 2]> {
    pairs.iter().map(|&[a, b]| [b, a]).collect()
}

/// Storage-order points as longitude-first pairs for the renderer.
pub fn to_lng_lat(points: &[GpsPoint]) -> Vec<[f64; 2]> {
    points.iter().map(|p| [p.longitude, p.latitude]).collect()
}

/// Longitude-first pairs back into points.
pub fn from_lng_lat(pairs: &[[f64; 2]]) -> Vec<GpsPoint> {
    pairs.iter().map(|&[lng, lat]| GpsPoint::new(lat, lng)).collect()
}

/// Latitude-first pairs (storage order) into points.
pub fn from_lat_lng(pairs: &[[f64; 2]]) -> Vec<GpsPoint> {
    pairs.iter().map(|&[lat, lng]| GpsPoint::new(lat, lng)).collect()
}

pub fn to_line_string(points: &[GpsPoint]) -> LineString<f64> {
    LineString::new(points.iter().map(|p| p.to_coord()).collect())
}

pub fn from_line_string(line: &LineString<f64>) -> Vec<GpsPoint> {
    line.coords().map(|c: &Coord<f64>| GpsPoint::from_coord(*c)).collect()
}

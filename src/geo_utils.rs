//! # Geographic Utilities
//!
//! Geodetic primitives shared by every analysis stage.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`distance_meters`] | Great-circle distance between two coordinate pairs |
//! | [`sample_distance`] | Same, between two [`LocationSample`]s |
//! | [`bearing_degrees`] | Initial bearing from one coordinate pair to another |
//! | [`path_length_meters`] | Total length of an ordered track |
//! | [`compute_center`] | Arithmetic-mean centroid of a set of samples |
//!
//! ## Haversine Formula
//!
//! Distances use the haversine formula on a sphere of radius 6,371,000 m. The
//! haversine argument is clamped to `[0, 1]` before the inverse trigonometric
//! step, so floating-point overshoot near antipodal points never yields NaN.
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)
//!
//! ## Coordinate System
//!
//! All functions expect WGS84 latitude/longitude in degrees.

use geo::{Bearing, Haversine, Point};
use crate::LocationSample;

/// Spherical Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in meters between two coordinate pairs given in degrees.
///
/// Returns exactly `0.0` for identical inputs and is symmetric in its arguments.
///
/// # Example
///
/// ```rust
/// use route_tracker::geo_utils::distance_meters;
///
/// // 0.0009° of latitude is roughly 100 m
/// let d = distance_meters(0.0, 0.0, 0.0009, 0.0);
/// assert!((d - 100.08).abs() < 0.1);
/// assert_eq!(distance_meters(10.0, 20.0, 10.0, 20.0), 0.0);
/// ```
#[inline]
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}

/// Great-circle distance in meters between two samples.
#[inline]
pub fn sample_distance(p1: &LocationSample, p2: &LocationSample) -> f64 {
    distance_meters(p1.latitude, p1.longitude, p2.latitude, p2.longitude)
}

/// Initial bearing in degrees clockwise from true north, normalized to `[0, 360)`.
///
/// # Example
///
/// ```rust
/// use route_tracker::geo_utils::bearing_degrees;
///
/// let east = bearing_degrees(0.0, 0.0, 0.0, 1.0);
/// assert!((east - 90.0).abs() < 1e-6);
/// ```
pub fn bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let origin = Point::new(lon1, lat1);
    let destination = Point::new(lon2, lat2);
    Haversine::bearing(origin, destination).rem_euclid(360.0)
}

/// Sum of the distances between consecutive samples, in meters.
///
/// Empty or single-point tracks return 0.0.
pub fn path_length_meters(points: &[LocationSample]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| sample_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Center/Centroid Functions
// =============================================================================

/// Arithmetic mean of the latitudes and longitudes of `points`.
///
/// Returns `None` for empty input. Suitable for the small clusters produced by
/// stop detection; it does not handle antimeridian crossings.
pub fn compute_center(points: &[LocationSample]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }

    let sum_lat: f64 = points.iter().map(|p| p.latitude).sum();
    let sum_lng: f64 = points.iter().map(|p| p.longitude).sum();
    let n = points.len() as f64;

    Some((sum_lat / n, sum_lng / n))
}

// =============================================================================
// Unit Tests
// =============================================================================

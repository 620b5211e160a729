//! # Stop-Point Detection
//!
//! Clusters a raw track into dwell events: places where the agent stayed
//! within a small radius for a minimum amount of time (a client visit, a
//! lunch break, a traffic jam).
//!
//! ## Algorithm
//! 1. Tracks with fewer than `min_points` samples yield nothing
//! 2. Open a cluster at the first sample
//! 3. Walk forward; the first sample further than `radius_meters` from the
//!    cluster's *first* sample (or the end of the track) closes the cluster
//! 4. A closed cluster spanning at least `min_duration_minutes` becomes a
//!    [`StopPoint`] at the mean position of its members
//! 5. The sample that broke the radius opens the next cluster
//!
//! This is a greedy forward scan, not density clustering: one far outlier in
//! the middle of a long dwell splits it into two clusters, each judged on its
//! own duration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{compute_center, sample_distance};
use crate::LocationSample;

/// Configuration for stop detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Maximum distance from the cluster's first sample (meters)
    pub radius_meters: f64,
    /// Minimum dwell time for a cluster to count as a stop (minutes)
    pub min_duration_minutes: f64,
    /// Tracks shorter than this carry too little signal
    pub min_points: usize,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            radius_meters: 30.0,
            min_duration_minutes: 5.0,
            min_points: 10,
        }
    }
}

/// A dwell cluster derived from a track. Recomputed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPoint {
    /// Mean latitude of the cluster members
    pub latitude: f64,
    /// Mean longitude of the cluster members
    pub longitude: f64,
    /// Timestamp of the first member
    pub arrived_at: DateTime<Utc>,
    /// Timestamp of the last member
    pub departed_at: DateTime<Utc>,
    /// Dwell time rounded to whole minutes
    pub duration_minutes: u32,
    /// Number of samples in the cluster
    pub point_count: usize,
}

/// Detect stops with the default thresholds (30 m, 5 min, 10 points).
///
/// # Example
///
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use route_tracker::{detect_stop_points, LocationSample};
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
/// // Twelve fixes at the same spot, one per minute
/// let track: Vec<LocationSample> = (0..12)
///     .map(|i| LocationSample::new(-0.18, -78.46, t + Duration::minutes(i)))
///     .collect();
///
/// let stops = detect_stop_points(&track);
/// assert_eq!(stops.len(), 1);
/// assert_eq!(stops[0].duration_minutes, 11);
/// ```
pub fn detect_stop_points(points: &[LocationSample]) -> Vec<StopPoint> {
    detect_stop_points_with(points, &StopConfig::default())
}

/// Detect stops with explicit thresholds.
pub fn detect_stop_points_with(points: &[LocationSample], config: &StopConfig) -> Vec<StopPoint> {
    if points.len() < config.min_points.max(1) {
        return Vec::new();
    }

    let mut stops = Vec::new();
    let mut cluster_start = 0;

    for i in 1..=points.len() {
        let out_of_radius = i < points.len()
            && sample_distance(&points[cluster_start], &points[i]) > config.radius_meters;

        if i == points.len() || out_of_radius {
            if let Some(stop) = close_cluster(&points[cluster_start..i], config) {
                stops.push(stop);
            }
            cluster_start = i;
        }
    }

    stops
}

/// Turn a finished cluster into a stop if it lasted long enough.
fn close_cluster(members: &[LocationSample], config: &StopConfig) -> Option<StopPoint> {
    let first = members.first()?;
    let last = members.last()?;

    let span_ms = (last.timestamp - first.timestamp).num_milliseconds();
    let span_minutes = span_ms as f64 / 60_000.0;
    if span_minutes < config.min_duration_minutes {
        return None;
    }

    let (latitude, longitude) = compute_center(members)?;

    Some(StopPoint {
        latitude,
        longitude,
        arrived_at: first.timestamp,
        departed_at: last.timestamp,
        duration_minutes: span_minutes.round() as u32,
        point_count: members.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
    }

    fn at_ms(ms: i64, lat: f64, lng: f64) -> LocationSample {
        LocationSample::new(lat, lng, t0() + Duration::milliseconds(ms))
    }

    /// `count` samples within a few meters of (lat, lng), evenly spread over `span_ms`.
    fn dwell(count: i64, span_ms: i64, start_ms: i64, lat: f64, lng: f64) -> Vec<LocationSample> {
        (0..count)
            .map(|i| {
                let wobble = (i % 4) as f64 * 0.00001; // up to ~3.3 m
                at_ms(start_ms + i * span_ms / (count - 1), lat + wobble, lng - wobble)
            })
            .collect()
    }

    #[test]
    fn test_too_few_points() {
        let track = dwell(9, 30 * 60_000, 0, 0.0, 0.0);
        assert!(detect_stop_points(&track).is_empty());
    }

    #[test]
    fn test_six_minute_dwell_is_one_stop() {
        let track = dwell(20, 6 * 60_000, 0, -0.18, -78.46);
        let stops = detect_stop_points(&track);
        assert_eq!(stops.len(), 1);
        let stop = &stops[0];
        assert_eq!(stop.duration_minutes, 6);
        assert_eq!(stop.point_count, 20);
        assert_eq!(stop.arrived_at, track[0].timestamp);
        assert_eq!(stop.departed_at, track[19].timestamp);
    }

    #[test]
    fn test_four_minute_dwell_is_not_a_stop() {
        let track = dwell(20, 4 * 60_000, 0, -0.18, -78.46);
        assert!(detect_stop_points(&track).is_empty());
    }

    #[test]
    fn test_centroid_is_member_mean() {
        let track = dwell(12, 10 * 60_000, 0, 1.0, 2.0);
        let stops = detect_stop_points(&track);
        assert_eq!(stops.len(), 1);
        let mean_lat = track.iter().map(|p| p.latitude).sum::<f64>() / 12.0;
        let mean_lng = track.iter().map(|p| p.longitude).sum::<f64>() / 12.0;
        assert!((stops[0].latitude - mean_lat).abs() < 1e-12);
        assert!((stops[0].longitude - mean_lng).abs() < 1e-12);
    }

    #[test]
    fn test_two_stops_separated_by_drive() {
        let mut track = dwell(10, 8 * 60_000, 0, 0.0, 0.0);
        // Drive north ~1 km in 100 m steps
        for i in 1..=10 {
            track.push(at_ms(8 * 60_000 + i * 10_000, i as f64 * 0.0009, 0.0));
        }
        track.extend(dwell(10, 12 * 60_000, 10 * 60_000, 0.009, 0.0));

        let stops = detect_stop_points(&track);
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].duration_minutes, 8);
        // The last drive sample sits at the second stop, so it opens that cluster
        assert_eq!(stops[1].arrived_at, track[19].timestamp);
        assert_eq!(stops[1].departed_at, track[track.len() - 1].timestamp);
    }

    #[test]
    fn test_outlier_splits_cluster() {
        let mut track = dwell(10, 4 * 60_000, 0, 0.0, 0.0);
        track.push(at_ms(4 * 60_000 + 30_000, 0.01, 0.0)); // ~1.1 km away
        track.extend(dwell(10, 4 * 60_000, 5 * 60_000, 0.0, 0.0));

        // Eight minutes at one place, but the outlier splits it into two short clusters
        assert!(detect_stop_points(&track).is_empty());
    }

    #[test]
    fn test_radius_measured_from_cluster_start() {
        // Creep north ~5 m per minute: the sixth step is just past 30 m from the start
        let track: Vec<LocationSample> = (0..15)
            .map(|i| at_ms(i * 60_000, i as f64 * 0.000045, 0.0))
            .collect();
        let stops = detect_stop_points(&track);
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].point_count, 6);
        assert_eq!(stops[0].duration_minutes, 5);
        assert_eq!(stops[1].arrived_at, track[6].timestamp);
    }

    #[test]
    fn test_duration_rounds_to_nearest_minute() {
        let track = dwell(10, 5 * 60_000 + 40_000, 0, 0.0, 0.0);
        let stops = detect_stop_points(&track);
        assert_eq!(stops[0].duration_minutes, 6);
    }

    #[test]
    fn test_custom_config() {
        let track = dwell(5, 3 * 60_000, 0, 0.0, 0.0);
        let config = StopConfig { radius_meters: 30.0, min_duration_minutes: 2.0, min_points: 3 };
        assert_eq!(detect_stop_points_with(&track, &config).len(), 1);
    }
}

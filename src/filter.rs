//! Stationary-noise filtering.
//!
//! While a device sits still its fixes wander by a few meters, which draws a
//! zig-zag on the map. This module reduces a track to the points that actually
//! moved, for path rendering.

use crate::geo_utils::sample_distance;
use crate::LocationSample;

/// Default minimum movement, in meters, for a point to be kept.
pub const MIN_MOVEMENT_METERS: f64 = 10.0;

/// Filter jitter with the default 10 m movement threshold.
///
/// See [`filter_stationary_noise_with`].
pub fn filter_stationary_noise(points: &[LocationSample]) -> Vec<LocationSample> {
    filter_stationary_noise_with(points, MIN_MOVEMENT_METERS)
}

/// Single left-to-right pass over `points`:
///
/// - the first point is always kept;
/// - points flagged stationary by the device are skipped outright;
/// - any other point is kept when it lies at least `min_movement_meters` from
///   the last *kept* point, or when it is the final point of the track (so the
///   rendered path is never visibly truncated).
///
/// # Example
///
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use route_tracker::{filter_stationary_noise, LocationSample};
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
/// let track = vec![
///     LocationSample::new(0.0, 0.0, t),
///     LocationSample::new(0.00001, 0.0, t + Duration::seconds(5)), // ~1 m jitter
///     LocationSample::new(0.0009, 0.0, t + Duration::seconds(60)),
/// ];
///
/// assert_eq!(filter_stationary_noise(&track).len(), 2);
/// ```
pub fn filter_stationary_noise_with(points: &[LocationSample], min_movement_meters: f64) -> Vec<LocationSample> {
    let Some(first) = points.first() else {
        return Vec::new();
    };

    let last_index = points.len() - 1;
    let mut filtered = vec![first.clone()];
    let mut last_kept = first;

    for (i, current) in points.iter().enumerate().skip(1) {
        if current.is_flagged_stationary() {
            continue;
        }

        let distance = sample_distance(last_kept, current);
        if distance >= min_movement_meters || i == last_index {
            filtered.push(current.clone());
            last_kept = current;
        }
    }

    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
    }

    fn at(secs: i64, lat: f64, lng: f64) -> LocationSample {
        LocationSample::new(lat, lng, t0() + Duration::seconds(secs))
    }

    #[test]
    fn test_empty_and_single() {
        assert!(filter_stationary_noise(&[]).is_empty());
        let single = vec![at(0, 0.0, 0.0)];
        assert_eq!(filter_stationary_noise(&single), single);
    }

    #[test]
    fn test_jitter_collapses() {
        // 50 points wobbling within ~1 m, then one point ~50 m away
        let mut track: Vec<LocationSample> = (0..50)
            .map(|i| {
                let wobble = if i % 2 == 0 { 0.0 } else { 0.00001 };
                at(i, wobble, wobble)
            })
            .collect();
        track.push(at(60, 0.00045, 0.0));

        let filtered = filter_stationary_noise(&track);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0], track[0]);
        assert_eq!(filtered[1], track[50]);
    }

    #[test]
    fn test_last_point_always_retained() {
        let track = vec![at(0, 0.0, 0.0), at(1, 0.00001, 0.0), at(2, 0.00002, 0.0)];
        let filtered = filter_stationary_noise(&track);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[1], track[2]);
    }

    #[test]
    fn test_jitter_then_move_then_jitter_keeps_endpoint() {
        let mut track: Vec<LocationSample> = (0..10).map(|i| at(i, 0.0, 0.0)).collect();
        track.push(at(20, 0.00045, 0.0));
        track.extend((21..30).map(|i| at(i, 0.00045, 0.000001)));

        let filtered = filter_stationary_noise(&track);
        assert_eq!(filtered.len(), 3);
        assert_eq!(filtered[2], track[track.len() - 1]);
    }

    #[test]
    fn test_stationary_flag_skips_even_large_moves() {
        let track = vec![
            at(0, 0.0, 0.0),
            at(10, 0.001, 0.0).stationary(),
            at(20, 0.002, 0.0),
        ];
        let filtered = filter_stationary_noise(&track);
        assert_eq!(filtered, vec![track[0].clone(), track[2].clone()]);
    }

    #[test]
    fn test_distance_measured_from_last_kept_point() {
        // Each step is ~6 m: too small alone, but the running offset from the
        // last kept point crosses 10 m every second step.
        let step = 0.000054;
        let track: Vec<LocationSample> = (0..5).map(|i| at(i, i as f64 * step, 0.0)).collect();
        let filtered = filter_stationary_noise(&track);
        let kept: Vec<i64> = filtered.iter().map(|p| p.timestamp.timestamp() - t0().timestamp()).collect();
        assert_eq!(kept, vec![0, 2, 4]);
    }

    #[test]
    fn test_custom_threshold() {
        let track = vec![at(0, 0.0, 0.0), at(1, 0.00003, 0.0), at(2, 0.00006, 0.0), at(3, 0.0001, 0.0)];
        // ~3.3 m steps: a 3 m threshold keeps all of them
        assert_eq!(filter_stationary_noise_with(&track, 3.0).len(), 4);
        assert_eq!(filter_stationary_noise_with(&track, 50.0).len(), 2);
    }
}

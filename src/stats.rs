//! Motion statistics over an ordered track.
//!
//! Statistics are always recomputed over the whole merged sequence rather than
//! folded in incrementally, so repeated syncs of the same data produce exactly
//! the same numbers.

use serde::{Deserialize, Serialize};

use crate::geo_utils::path_length_meters;
use crate::LocationSample;

/// Conversion factor from m/s to km/h.
const MPS_TO_KMH: f64 = 3.6;

/// Derived distance and speed figures of a track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionStats {
    /// Sum of consecutive great-circle distances, in km
    pub total_distance_km: f64,
    /// Highest reported positive speed, in km/h
    pub max_speed_kmh: f64,
    /// Mean of the reported positive speeds, in km/h (0 when none)
    pub average_speed_kmh: f64,
}

impl MotionStats {
    /// Compute statistics for an ordered point sequence.
    ///
    /// Speeds come from the device-reported `speed` field only, starting at
    /// the second point; absent or non-positive speeds are excluded from both
    /// the maximum and the average. Empty input yields all zeros.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chrono::{Duration, TimeZone, Utc};
    /// use route_tracker::{LocationSample, MotionStats};
    ///
    /// let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
    /// let track = vec![
    ///     LocationSample::new(0.0, 0.0, t),
    ///     LocationSample::new(0.0009, 0.0, t + Duration::seconds(60)).with_speed(10.0),
    ///     LocationSample::new(0.0018, 0.0, t + Duration::seconds(120)).with_speed(5.0),
    /// ];
    ///
    /// let stats = MotionStats::from_points(&track);
    /// assert!((stats.total_distance_km - 0.2).abs() < 0.001);
    /// assert!((stats.max_speed_kmh - 36.0).abs() < 1e-9);
    /// assert!((stats.average_speed_kmh - 27.0).abs() < 1e-9);
    /// ```
    pub fn from_points(points: &[LocationSample]) -> Self {
        let total_distance_m = path_length_meters(points);

        let mut max_speed_kmh = 0.0_f64;
        let mut speed_sum = 0.0;
        let mut speed_count = 0usize;

        for speed in points.iter().skip(1).filter_map(|p| p.speed) {
            if speed <= 0.0 || !speed.is_finite() {
                continue;
            }
            let kmh = speed * MPS_TO_KMH;
            max_speed_kmh = max_speed_kmh.max(kmh);
            speed_sum += kmh;
            speed_count += 1;
        }

        let average_speed_kmh = if speed_count > 0 {
            speed_sum / speed_count as f64
        } else {
            0.0
        };

        Self {
            total_distance_km: total_distance_m / 1000.0,
            max_speed_kmh,
            average_speed_kmh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::distance_meters;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
    }

    fn at(secs: i64, lat: f64, lng: f64) -> LocationSample {
        LocationSample::new(lat, lng, t0() + Duration::seconds(secs))
    }

    #[test]
    fn test_empty_and_single() {
        assert_eq!(MotionStats::from_points(&[]), MotionStats::default());
        let single = vec![at(0, 1.0, 1.0).with_speed(20.0)];
        assert_eq!(MotionStats::from_points(&single), MotionStats::default());
    }

    #[test]
    fn test_scenario_three_points_no_speed() {
        let track = vec![at(0, 0.0, 0.0), at(60, 0.0009, 0.0), at(120, 0.0009, 0.0)];
        let stats = MotionStats::from_points(&track);
        assert!((stats.total_distance_km - 0.1).abs() < 0.001);
        assert_eq!(stats.max_speed_kmh, 0.0);
        assert_eq!(stats.average_speed_kmh, 0.0);
    }

    #[test]
    fn test_distance_matches_incremental_km_sum() {
        let track: Vec<LocationSample> = (0..25)
            .map(|i| at(i * 10, -0.18 + i as f64 * 0.0003, -78.46 + (i % 3) as f64 * 0.0002))
            .collect();
        let stats = MotionStats::from_points(&track);
        let incremental: f64 = track
            .windows(2)
            .map(|w| distance_meters(w[0].latitude, w[0].longitude, w[1].latitude, w[1].longitude) / 1000.0)
            .sum();
        assert!((stats.total_distance_km - incremental).abs() < 1e-9);
    }

    #[test]
    fn test_first_point_speed_excluded() {
        let track = vec![at(0, 0.0, 0.0).with_speed(50.0), at(1, 0.0, 0.0).with_speed(2.0)];
        let stats = MotionStats::from_points(&track);
        assert!((stats.max_speed_kmh - 7.2).abs() < 1e-9);
        assert!((stats.average_speed_kmh - 7.2).abs() < 1e-9);
    }

    #[test]
    fn test_zero_and_missing_speeds_excluded() {
        let track = vec![
            at(0, 0.0, 0.0),
            at(1, 0.0, 0.0).with_speed(0.0),
            at(2, 0.0, 0.0),
            at(3, 0.0, 0.0).with_speed(-1.0),
            at(4, 0.0, 0.0).with_speed(10.0),
        ];
        let stats = MotionStats::from_points(&track);
        assert!((stats.max_speed_kmh - 36.0).abs() < 1e-9);
        assert!((stats.average_speed_kmh - 36.0).abs() < 1e-9);
    }
}

//! # Route Tracker
//!
//! GPS trajectory ingestion and semantic analysis for field-agent tracking sessions.
//!
//! This library provides:
//! - Deduplicating merge of streamed location samples into a persisted session
//! - Motion statistics (distance, maximum and average speed) over the merged track
//! - Stationary-noise filtering for path rendering
//! - Stop-point detection (dwell clusters of minimum duration and maximum radius)
//! - GPX export and per-day session queries
//!
//! ## Features
//!
//! - **`http`** - HTTP ingestion/query server (enabled by default)
//! - **`parallel`** - Analyze session batches in parallel with rayon
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use route_tracker::{LocationSample, MemoryStore, SessionSync, SyncRequest};
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
//! let points = vec![
//!     LocationSample::new(0.0, 0.0, t0),
//!     LocationSample::new(0.0009, 0.0, t0 + chrono::Duration::seconds(60)),
//! ];
//!
//! let sync = SessionSync::new(MemoryStore::new());
//! let outcome = sync
//!     .merge_incoming_points(SyncRequest::new("session-1", "agent-7", points, vec![]))
//!     .unwrap();
//!
//! assert_eq!(outcome.total_points, 2);
//! assert_eq!(outcome.added_points, 2);
//! assert!((outcome.session.total_distance_km - 0.1).abs() < 0.001);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod analysis;
pub mod config;
pub mod error;
pub mod filter;
pub mod geo_utils;
pub mod gpx;
pub mod normalizer;
pub mod query;
pub mod stats;
pub mod stops;
pub mod store;
pub mod sync;

// HTTP ingestion/query server
#[cfg(feature = "http")]
pub mod http;

pub use analysis::{analyze_session, analyze_sessions, format_duration, SessionAnalysis};
pub use config::{AnalysisConfig, Config};
pub use error::TrackingError;
pub use filter::filter_stationary_noise;
pub use normalizer::{merge_events, merge_points, PointMerge, DEDUP_TOLERANCE_MS};
pub use stats::MotionStats;
pub use stops::{detect_stop_points, StopPoint};
pub use store::{JsonFileStore, MemoryStore, SessionStore};
pub use sync::{AppendOutcome, AppendRequest, SessionState, SessionSync, SyncOutcome, SyncRequest};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RouteTrackerRust")
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// One raw GPS fix as reported by the field agent's device.
///
/// Samples are immutable once recorded. Only the timestamp takes part in
/// deduplication; coordinates are never compared.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use route_tracker::LocationSample;
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
/// let sample = LocationSample::new(-0.1807, -78.4678, t).with_speed(4.2);
/// assert!(sample.is_valid());
/// assert_eq!(sample.speed, Some(4.2));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    #[serde(default)]
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
    /// Instantaneous speed in m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Device-side stillness hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_stationary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<DrivingEvent>,
}

impl LocationSample {
    /// Create a sample with only position and time set.
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: 0.0,
            timestamp,
            speed: None,
            heading: None,
            is_stationary: None,
            event: None,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed = Some(speed_mps);
        self
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy = accuracy_m;
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    /// Mark the sample as reported stationary by the device.
    pub fn stationary(mut self) -> Self {
        self.is_stationary = Some(true);
        self
    }

    /// Milliseconds since the Unix epoch.
    #[inline]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// True when the device flagged this fix as stationary.
    #[inline]
    pub fn is_flagged_stationary(&self) -> bool {
        self.is_stationary.unwrap_or(false)
    }

    /// Check if the sample has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Kind of semantic annotation attached to a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrivingEventKind {
    SpeedViolation,
    HarshBrake,
    RapidAcceleration,
    PhoneUse,
    StartTrip,
    EndTrip,
    Stationary,
    Payment,
}

impl DrivingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrivingEventKind::SpeedViolation => "SPEED_VIOLATION",
            DrivingEventKind::HarshBrake => "HARSH_BRAKE",
            DrivingEventKind::RapidAcceleration => "RAPID_ACCELERATION",
            DrivingEventKind::PhoneUse => "PHONE_USE",
            DrivingEventKind::StartTrip => "START_TRIP",
            DrivingEventKind::EndTrip => "END_TRIP",
            DrivingEventKind::Stationary => "STATIONARY",
            DrivingEventKind::Payment => "PAYMENT",
        }
    }
}

/// How a collected payment was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "efectivo", alias = "cash")]
    Cash,
    #[serde(rename = "transferencia", alias = "transfer")]
    Transfer,
}

/// Business metadata carried by `Payment` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    #[serde(default, alias = "clienteNombre", skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, alias = "montoPagado", skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, alias = "formaPago", skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, alias = "numeroComprobante", skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
}

/// A semantic annotation at a point in time and space.
///
/// Produced by the mobile client or the business layer. This crate only
/// stores, counts and exports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivingEvent {
    #[serde(rename = "type")]
    pub kind: DrivingEventKind,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Speed in km/h (speed violations)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Acceleration in m/s² or payment amount, depending on kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PaymentDetails>,
}

impl DrivingEvent {
    pub fn new(kind: DrivingEventKind, latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            latitude,
            longitude,
            speed: None,
            value: None,
            metadata: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_payment(mut self, details: PaymentDetails) -> Self {
        self.metadata = Some(details);
        self
    }

    /// The numeric magnitude of the event: speed for violations, value otherwise.
    pub fn magnitude(&self) -> Option<f64> {
        match self.kind {
            DrivingEventKind::SpeedViolation => self.speed.or(self.value),
            _ => self.value.or(self.speed),
        }
    }

    /// Amount collected, for `Payment` events only.
    pub fn payment_amount(&self) -> Option<f64> {
        if self.kind != DrivingEventKind::Payment {
            return None;
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.amount)
            .or(self.value)
    }

    #[inline]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// One continuous tracking interval for one agent.
///
/// This is the persisted record. Points are kept in chronological insertion
/// order and are unique per timestamp (within [`DEDUP_TOLERANCE_MS`]); the
/// statistics fields always reflect the current point sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub session_id: String,
    #[serde(alias = "userId")]
    pub owner_id: String,
    pub start_time: DateTime<Utc>,
    /// Timestamp of the last point; absent while no point has been stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub points: Vec<LocationSample>,
    #[serde(default)]
    pub events: Vec<DrivingEvent>,
    #[serde(default)]
    pub total_distance_km: f64,
    #[serde(default)]
    pub max_speed_kmh: f64,
    #[serde(default)]
    pub average_speed_kmh: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TrackingSession {
    /// Create an empty session record.
    ///
    /// `start_time` is the first point's timestamp when the batch is known;
    /// callers creating a session with no points pass the creation time.
    pub fn new(
        session_id: impl Into<String>,
        owner_id: impl Into<String>,
        start_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            owner_id: owner_id.into(),
            start_time,
            end_time: None,
            points: Vec::new(),
            events: Vec::new(),
            total_distance_km: 0.0,
            max_speed_kmh: 0.0,
            average_speed_kmh: 0.0,
            synced_at: None,
            created_at,
        }
    }

    /// Current derived statistics as stored on the record.
    pub fn stats(&self) -> MotionStats {
        MotionStats {
            total_distance_km: self.total_distance_km,
            max_speed_kmh: self.max_speed_kmh,
            average_speed_kmh: self.average_speed_kmh,
        }
    }

    /// Recompute statistics and `end_time` from the full point sequence.
    pub fn refresh_stats(&mut self) {
        let stats = MotionStats::from_points(&self.points);
        self.total_distance_km = stats.total_distance_km;
        self.max_speed_kmh = stats.max_speed_kmh;
        self.average_speed_kmh = stats.average_speed_kmh;
        if let Some(last) = self.points.last() {
            self.end_time = Some(last.timestamp);
        }
    }

    pub fn state(&self) -> SessionState {
        if self.events.iter().any(|e| e.kind == DrivingEventKind::EndTrip) {
            SessionState::Closed
        } else {
            SessionState::Open
        }
    }
}

/// Bounding box of a point sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from samples. Returns `None` for an empty slice.
    pub fn from_points(points: &[LocationSample]) -> Option<Self> {
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

        Some(Self { min_lat, max_lat, min_lng, max_lng })
    }

    /// Get the center of the bounds as (latitude, longitude).
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use chrono::TimeZone;
    use log::{debug, info};

    /// Location sample with a millisecond epoch timestamp for mobile callers.
    #[derive(Debug, Clone, uniffi::Record)]
    pub struct FfiLocationSample {
        pub latitude: f64,
        pub longitude: f64,
        pub accuracy: f64,
        pub timestamp_ms: i64,
        pub speed: Option<f64>,
        pub heading: Option<f64>,
        pub is_stationary: bool,
    }

    #[derive(Debug, Clone, uniffi::Record)]
    pub struct FfiStopPoint {
        pub latitude: f64,
        pub longitude: f64,
        pub arrived_at_ms: i64,
        pub departed_at_ms: i64,
        pub duration_minutes: u32,
    }

    #[derive(Debug, Clone, uniffi::Record)]
    pub struct FfiMotionStats {
        pub total_distance_km: f64,
        pub max_speed_kmh: f64,
        pub average_speed_kmh: f64,
    }

    fn to_sample(p: &FfiLocationSample) -> Option<LocationSample> {
        let timestamp = Utc.timestamp_millis_opt(p.timestamp_ms).single()?;
        Some(LocationSample {
            latitude: p.latitude,
            longitude: p.longitude,
            accuracy: p.accuracy,
            timestamp,
            speed: p.speed,
            heading: p.heading,
            is_stationary: Some(p.is_stationary),
            event: None,
        })
    }

    fn to_ffi(p: &LocationSample) -> FfiLocationSample {
        FfiLocationSample {
            latitude: p.latitude,
            longitude: p.longitude,
            accuracy: p.accuracy,
            timestamp_ms: p.timestamp_millis(),
            speed: p.speed,
            heading: p.heading,
            is_stationary: p.is_flagged_stationary(),
        }
    }

    fn convert(points: &[FfiLocationSample]) -> Vec<LocationSample> {
        let samples: Vec<LocationSample> = points.iter().filter_map(to_sample).collect();
        if samples.len() != points.len() {
            debug!(
                "[RouteTrackerRust] Dropped {} samples with out-of-range timestamps",
                points.len() - samples.len()
            );
        }
        samples
    }

    /// Great-circle distance in meters.
    #[uniffi::export]
    pub fn ffi_distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        crate::geo_utils::distance_meters(lat1, lon1, lat2, lon2)
    }

    /// Initial bearing in degrees clockwise from north, in [0, 360).
    #[uniffi::export]
    pub fn ffi_bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        crate::geo_utils::bearing_degrees(lat1, lon1, lat2, lon2)
    }

    /// Remove stationary jitter for path rendering.
    #[uniffi::export]
    pub fn ffi_filter_stationary_noise(
        points: Vec<FfiLocationSample>,
        min_movement_meters: f64,
    ) -> Vec<FfiLocationSample> {
        init_logging();
        let samples = convert(&points);
        let filtered = crate::filter::filter_stationary_noise_with(&samples, min_movement_meters);
        info!(
            "[RouteTrackerRust] filter_stationary_noise: {} -> {} points",
            samples.len(),
            filtered.len()
        );
        filtered.iter().map(to_ffi).collect()
    }

    /// Detect dwell clusters with the default thresholds.
    #[uniffi::export]
    pub fn ffi_detect_stop_points(points: Vec<FfiLocationSample>) -> Vec<FfiStopPoint> {
        init_logging();
        let samples = convert(&points);
        let stops = crate::stops::detect_stop_points(&samples);
        info!("[RouteTrackerRust] detect_stop_points: {} points -> {} stops", samples.len(), stops.len());
        stops
            .into_iter()
            .map(|s| FfiStopPoint {
                latitude: s.latitude,
                longitude: s.longitude,
                arrived_at_ms: s.arrived_at.timestamp_millis(),
                departed_at_ms: s.departed_at.timestamp_millis(),
                duration_minutes: s.duration_minutes,
            })
            .collect()
    }

    /// Distance and speed statistics over an ordered track.
    #[uniffi::export]
    pub fn ffi_motion_stats(points: Vec<FfiLocationSample>) -> FfiMotionStats {
        init_logging();
        let stats = MotionStats::from_points(&convert(&points));
        FfiMotionStats {
            total_distance_km: stats.total_distance_km,
            max_speed_kmh: stats.max_speed_kmh,
            average_speed_kmh: stats.average_speed_kmh,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_sample_validation() {
        assert!(LocationSample::new(-0.18, -78.46, t0()).is_valid());
        assert!(!LocationSample::new(91.0, 0.0, t0()).is_valid());
        assert!(!LocationSample::new(0.0, 181.0, t0()).is_valid());
        assert!(!LocationSample::new(f64::NAN, 0.0, t0()).is_valid());
    }

    #[test]
    fn test_sample_json_shape() {
        let json = r#"{
            "latitude": -0.18,
            "longitude": -78.46,
            "accuracy": 12.5,
            "timestamp": "2024-03-01T14:00:00.250Z",
            "speed": 3.0,
            "isStationary": true
        }"#;
        let sample: LocationSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.accuracy, 12.5);
        assert_eq!(sample.timestamp_millis() % 1000, 250);
        assert!(sample.is_flagged_stationary());
        assert_eq!(sample.heading, None);

        let out = serde_json::to_value(&sample).unwrap();
        assert_eq!(out["isStationary"], true);
        assert!(out.get("heading").is_none());
    }

    #[test]
    fn test_payment_event_wire_names() {
        let json = r#"{
            "type": "PAYMENT",
            "timestamp": "2024-03-01T14:05:00Z",
            "latitude": -0.18,
            "longitude": -78.46,
            "value": 25.5,
            "metadata": {
                "clienteNombre": "Ana Torres",
                "formaPago": "efectivo",
                "numeroComprobante": "R-0091"
            }
        }"#;
        let event: DrivingEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, DrivingEventKind::Payment);
        let meta = event.metadata.as_ref().unwrap();
        assert_eq!(meta.client_name.as_deref(), Some("Ana Torres"));
        assert_eq!(meta.payment_method, Some(PaymentMethod::Cash));
        assert_eq!(event.payment_amount(), Some(25.5));
        assert_eq!(event.magnitude(), Some(25.5));
    }

    #[test]
    fn test_speed_violation_magnitude_prefers_speed() {
        let mut event = DrivingEvent::new(DrivingEventKind::SpeedViolation, 0.0, 0.0, t0());
        event.speed = Some(92.0);
        event.value = Some(1.0);
        assert_eq!(event.magnitude(), Some(92.0));
        assert_eq!(event.payment_amount(), None);
    }

    #[test]
    fn test_session_accepts_legacy_user_id() {
        let json = r#"{
            "sessionId": "s-1",
            "userId": "agent-7",
            "startTime": "2024-03-01T14:00:00Z",
            "createdAt": "2024-03-01T14:00:00Z"
        }"#;
        let session: TrackingSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.owner_id, "agent-7");
        assert!(session.points.is_empty());
        assert_eq!(session.end_time, None);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_end_trip_closes_session() {
        let mut session = TrackingSession::new("s-1", "agent-7", t0(), t0());
        session.events.push(DrivingEvent::new(DrivingEventKind::EndTrip, 0.0, 0.0, t0()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_bounds_from_points() {
        let points = vec![
            LocationSample::new(-0.20, -78.50, t0()),
            LocationSample::new(-0.10, -78.40, t0()),
        ];
        let bounds = Bounds::from_points(&points).unwrap();
        assert_eq!(bounds.min_lat, -0.20);
        assert_eq!(bounds.max_lng, -78.40);
        let (lat, lng) = bounds.center();
        assert!((lat - -0.15).abs() < 1e-9);
        assert!((lng - -78.45).abs() < 1e-9);
        assert!(Bounds::from_points(&[]).is_none());
    }
}

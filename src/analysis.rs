//! Derived per-session view for map rendering and daily summaries.
//!
//! Both the map screen and the ingestion path read their numbers from here
//! and from [`crate::stats`], so the rendered path, the stops and the stored
//! statistics always come from the same code.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::filter::filter_stationary_noise_with;
use crate::stops::{detect_stop_points_with, StopPoint};
use crate::{Bounds, DrivingEventKind, LocationSample, TrackingSession};

/// Everything a client needs to draw one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalysis {
    pub session_id: String,
    /// Track with stationary jitter removed
    pub visual_path: Vec<LocationSample>,
    /// Dwell clusters, detected on the raw track
    pub stops: Vec<StopPoint>,
    pub total_stop_minutes: u32,
    pub event_counts: BTreeMap<DrivingEventKind, usize>,
    /// Sum of collected amounts over `Payment` events
    pub payment_total: f64,
    /// Whole minutes (truncated) from start to end; `None` while no point has been stored
    pub duration_minutes: Option<i64>,
    pub bounds: Option<Bounds>,
}

/// Build the derived view of one session.
///
/// # Example
///
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use route_tracker::{analyze_session, AnalysisConfig, LocationSample, TrackingSession};
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
/// let mut session = TrackingSession::new("s-1", "agent-7", t, t);
/// session.points = (0..12)
///     .map(|i| LocationSample::new(-0.18, -78.46, t + Duration::minutes(i)))
///     .collect();
/// session.refresh_stats();
///
/// let analysis = analyze_session(&session, &AnalysisConfig::default());
/// assert_eq!(analysis.stops.len(), 1);
/// assert_eq!(analysis.duration_minutes, Some(11));
/// // Jitter-free but motionless: first and last point only
/// assert_eq!(analysis.visual_path.len(), 2);
/// ```
pub fn analyze_session(session: &TrackingSession, config: &AnalysisConfig) -> SessionAnalysis {
    let visual_path = filter_stationary_noise_with(&session.points, config.min_movement_meters);
    let stops = detect_stop_points_with(&session.points, &config.stop_config());
    let total_stop_minutes = stops.iter().map(|s| s.duration_minutes).sum();

    let mut event_counts = BTreeMap::new();
    let mut payment_total = 0.0;
    for event in &session.events {
        *event_counts.entry(event.kind).or_insert(0) += 1;
        payment_total += event.payment_amount().unwrap_or(0.0);
    }

    let duration_minutes = session
        .end_time
        .map(|end| (end - session.start_time).num_minutes());

    debug!(
        "[Analysis] {}: {} points -> {} rendered, {} stops",
        session.session_id,
        session.points.len(),
        visual_path.len(),
        stops.len()
    );

    SessionAnalysis {
        session_id: session.session_id.clone(),
        visual_path,
        stops,
        total_stop_minutes,
        event_counts,
        payment_total,
        duration_minutes,
        bounds: Bounds::from_points(&session.points),
    }
}

/// Analyze a batch of sessions (typically one agent's day), preserving order.
#[cfg(feature = "parallel")]
pub fn analyze_sessions(sessions: &[TrackingSession], config: &AnalysisConfig) -> Vec<SessionAnalysis> {
    use rayon::prelude::*;

    sessions
        .par_iter()
        .map(|s| analyze_session(s, config))
        .collect()
}

/// Analyze a batch of sessions (typically one agent's day), preserving order.
#[cfg(not(feature = "parallel"))]
pub fn analyze_sessions(sessions: &[TrackingSession], config: &AnalysisConfig) -> Vec<SessionAnalysis> {
    sessions.iter().map(|s| analyze_session(s, config)).collect()
}

/// Human-readable duration: `"45 min"`, `"2h 5m"`.
pub fn format_duration(minutes: i64) -> String {
    let minutes = minutes.max(0);
    if minutes < 60 {
        format!("{} min", minutes)
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DrivingEvent, PaymentDetails};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
    }

    fn session_with_visit() -> TrackingSession {
        let mut session = TrackingSession::new("s-1", "agent-7", t0(), t0());
        // Drive ~500 m north, one fix every 10 s
        for i in 0..6 {
            session
                .points
                .push(LocationSample::new(i as f64 * 0.0009, 0.0, t0() + Duration::seconds(i * 10)));
        }
        // Fifteen minutes at a client, one fix per minute, stationary flagged
        for i in 1..=15 {
            session.points.push(
                LocationSample::new(0.0045, 0.0, t0() + Duration::seconds(50) + Duration::minutes(i))
                    .stationary(),
            );
        }
        session.refresh_stats();
        session
    }

    #[test]
    fn test_visit_produces_stop_and_short_path() {
        let session = session_with_visit();
        let analysis = analyze_session(&session, &AnalysisConfig::default());

        assert_eq!(analysis.stops.len(), 1);
        assert_eq!(analysis.stops[0].duration_minutes, 15);
        assert_eq!(analysis.total_stop_minutes, 15);
        // The stationary-flagged dwell never reaches the rendered path
        assert_eq!(analysis.visual_path.len(), 6);
        // 15 min 50 s: partial minutes are dropped
        assert_eq!(analysis.duration_minutes, Some(15));
        assert!(analysis.bounds.is_some());
    }

    #[test]
    fn test_event_counts_and_payment_total() {
        let mut session = session_with_visit();
        let at = |m| t0() + Duration::minutes(m);
        session.events = vec![
            DrivingEvent::new(DrivingEventKind::StartTrip, 0.0, 0.0, at(0)),
            DrivingEvent::new(DrivingEventKind::Payment, 0.0045, 0.0, at(5)).with_value(20.0),
            DrivingEvent::new(DrivingEventKind::Payment, 0.0045, 0.0, at(7)).with_payment(PaymentDetails {
                amount: Some(12.5),
                ..PaymentDetails::default()
            }),
            DrivingEvent::new(DrivingEventKind::HarshBrake, 0.0, 0.0, at(9)).with_value(30.0),
        ];

        let analysis = analyze_session(&session, &AnalysisConfig::default());
        assert_eq!(analysis.event_counts[&DrivingEventKind::Payment], 2);
        assert_eq!(analysis.event_counts[&DrivingEventKind::StartTrip], 1);
        assert!(!analysis.event_counts.contains_key(&DrivingEventKind::EndTrip));
        assert!((analysis.payment_total - 32.5).abs() < 1e-9);

        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["eventCounts"]["PAYMENT"], 2);
    }

    #[test]
    fn test_empty_session() {
        let session = TrackingSession::new("s-1", "agent-7", t0(), t0());
        let analysis = analyze_session(&session, &AnalysisConfig::default());
        assert!(analysis.visual_path.is_empty());
        assert!(analysis.stops.is_empty());
        assert_eq!(analysis.duration_minutes, None);
        assert_eq!(analysis.bounds, None);
        assert_eq!(analysis.payment_total, 0.0);
    }

    #[test]
    fn test_batch_preserves_order() {
        let a = session_with_visit();
        let mut b = TrackingSession::new("s-2", "agent-7", t0(), t0());
        b.points.push(LocationSample::new(1.0, 1.0, t0()));
        b.refresh_stats();

        let results = analyze_sessions(&[a, b], &AnalysisConfig::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].session_id, "s-1");
        assert_eq!(results[1].session_id, "s-2");
        assert_eq!(results[1].duration_minutes, Some(0));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0 min");
        assert_eq!(format_duration(45), "45 min");
        assert_eq!(format_duration(60), "1h 0m");
        assert_eq!(format_duration(125), "2h 5m");
        assert_eq!(format_duration(-3), "0 min");
    }
}

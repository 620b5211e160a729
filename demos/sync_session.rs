//! Simulate a device syncing a session in overlapping batches, then analyze it.
//!
//! Run with: cargo run --example sync_session

use chrono::{Duration, TimeZone, Utc};
use route_tracker::gpx::export_gpx;
use route_tracker::{
    analyze_session, format_duration, AnalysisConfig, DrivingEvent, DrivingEventKind, LocationSample,
    MemoryStore, SessionSync, SyncRequest,
};

fn main() {
    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
    let at = |secs: i64| t0 + Duration::seconds(secs);

    // Quito, driving north ~50 m every 10 s, then a 12-minute client visit
    let mut track: Vec<LocationSample> = (0..20)
        .map(|i| LocationSample::new(-0.1807 + i as f64 * 0.00045, -78.4678, at(i * 10)).with_speed(5.0))
        .collect();
    let visit_lat = -0.1807 + 19.0 * 0.00045;
    track.extend((1..=12).map(|m| LocationSample::new(visit_lat, -78.4678, at(190 + m * 60)).with_accuracy(6.0)));

    let sync = SessionSync::new(MemoryStore::new());

    println!("Session Sync Example\n");

    // Batches overlap by five points, as a device retrying a failed upload would
    for (n, chunk) in [&track[..15], &track[10..25], &track[20..]].iter().enumerate() {
        let events = if n == 0 {
            vec![DrivingEvent::new(DrivingEventKind::StartTrip, -0.1807, -78.4678, t0)]
        } else {
            vec![]
        };
        let outcome = sync
            .merge_incoming_points(SyncRequest::new("demo-session", "agent-7", chunk.to_vec(), events))
            .unwrap();
        println!(
            "Batch {}: sent {:2}, added {:2}, total {:2}, distance {:.3} km",
            n + 1,
            chunk.len(),
            outcome.added_points,
            outcome.total_points,
            outcome.session.total_distance_km
        );
    }

    let session = sync.session("demo-session").unwrap();
    println!(
        "\nStats: max {:.1} km/h, average {:.1} km/h",
        session.max_speed_kmh, session.average_speed_kmh
    );

    let analysis = analyze_session(&session, &AnalysisConfig::default());
    println!("Rendered path: {} of {} points", analysis.visual_path.len(), session.points.len());
    for stop in &analysis.stops {
        println!(
            "Stop at ({:.5}, {:.5}) for {} ({} fixes)",
            stop.latitude,
            stop.longitude,
            format_duration(stop.duration_minutes as i64),
            stop.point_count
        );
    }

    let gpx = export_gpx(&session, Utc::now()).unwrap();
    println!("\nGPX export: {} bytes", gpx.len());
}

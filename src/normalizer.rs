//! Point stream normalization.
//!
//! Merges an incoming batch of samples (or events) into a previously stored
//! chronological sequence, dropping anything that duplicates an already-known
//! fix. Two items are duplicates when their timestamps differ by less than
//! [`DEDUP_TOLERANCE_MS`]; coordinates are never compared because a device may
//! legitimately report a stale fix and a fresh one within the same half-second.
//!
//! The stored sequence is only ever appended to: it is never reordered or
//! truncated. Incoming items are tested against the stored items *and* against
//! the incoming items already accepted, so a batch that repeats itself is
//! collapsed as well.

use std::collections::BTreeSet;

use log::debug;

use crate::{DrivingEvent, LocationSample};

/// Two fixes closer than this in time are the same physical fix.
pub const DEDUP_TOLERANCE_MS: i64 = 500;

/// Result of merging a batch of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMerge {
    /// Stored samples followed by the accepted new samples
    pub merged: Vec<LocationSample>,
    /// The new samples that were not duplicates, in arrival order
    pub added: Vec<LocationSample>,
}

impl PointMerge {
    pub fn added_count(&self) -> usize {
        self.added.len()
    }
}

/// Timestamp index answering "is any known timestamp within tolerance of `t`?".
struct TimestampIndex {
    seen: BTreeSet<i64>,
}

impl TimestampIndex {
    fn new(timestamps: impl Iterator<Item = i64>) -> Self {
        Self { seen: timestamps.collect() }
    }

    fn is_duplicate(&self, t: i64) -> bool {
        let lo = t.saturating_sub(DEDUP_TOLERANCE_MS - 1);
        let hi = t.saturating_add(DEDUP_TOLERANCE_MS - 1);
        self.seen.range(lo..=hi).next().is_some()
    }

    fn insert(&mut self, t: i64) {
        self.seen.insert(t);
    }
}

/// Generic append-only merge keyed on a millisecond timestamp.
fn merge_by_timestamp<T: Clone>(
    existing: &[T],
    incoming: &[T],
    timestamp_of: impl Fn(&T) -> i64,
) -> (Vec<T>, Vec<T>) {
    let mut index = TimestampIndex::new(existing.iter().map(&timestamp_of));
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    merged.extend_from_slice(existing);
    let mut added = Vec::new();

    for item in incoming {
        let t = timestamp_of(item);
        if index.is_duplicate(t) {
            continue;
        }
        index.insert(t);
        merged.push(item.clone());
        added.push(item.clone());
    }

    (merged, added)
}

/// Merge `incoming` samples into the stored sequence `existing`.
///
/// # Example
///
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use route_tracker::{merge_points, LocationSample};
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
/// let stored = vec![LocationSample::new(0.0, 0.0, t)];
/// let batch = vec![
///     LocationSample::new(0.0, 0.0, t + Duration::milliseconds(499)), // same fix
///     LocationSample::new(0.0, 0.0, t + Duration::milliseconds(501)),
/// ];
///
/// let merge = merge_points(&stored, &batch);
/// assert_eq!(merge.merged.len(), 2);
/// assert_eq!(merge.added_count(), 1);
/// ```
pub fn merge_points(existing: &[LocationSample], incoming: &[LocationSample]) -> PointMerge {
    let (merged, added) = merge_by_timestamp(existing, incoming, LocationSample::timestamp_millis);

    let dropped = incoming.len() - added.len();
    if dropped > 0 {
        debug!(
            "[Normalizer] Dropped {} duplicate points ({} stored, {} incoming)",
            dropped,
            existing.len(),
            incoming.len()
        );
    }

    PointMerge { merged, added }
}

/// Merge `incoming` events into `existing` with the same timestamp rule.
///
/// The comparison ignores the event kind: a `SpeedViolation` and a `Payment`
/// within 500 ms of each other collapse into whichever was stored first.
/// Returns the merged list and the number of events added.
pub fn merge_events(existing: &[DrivingEvent], incoming: &[DrivingEvent]) -> (Vec<DrivingEvent>, usize) {
    let (merged, added) = merge_by_timestamp(existing, incoming, DrivingEvent::timestamp_millis);

    let dropped = incoming.len() - added.len();
    if dropped > 0 {
        debug!("[Normalizer] Dropped {} duplicate events", dropped);
    }

    (merged, added.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DrivingEventKind;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()
    }

    fn at_ms(ms: i64) -> LocationSample {
        LocationSample::new(0.0, 0.0, t0() + Duration::milliseconds(ms))
    }

    #[test]
    fn test_merge_into_empty() {
        let batch = vec![at_ms(0), at_ms(1000), at_ms(2000)];
        let merge = merge_points(&[], &batch);
        assert_eq!(merge.merged, batch);
        assert_eq!(merge.added, batch);
    }

    #[test]
    fn test_dedup_boundary_499_vs_501() {
        let merge = merge_points(&[], &[at_ms(0), at_ms(499)]);
        assert_eq!(merge.merged.len(), 1);

        let merge = merge_points(&[], &[at_ms(0), at_ms(501)]);
        assert_eq!(merge.merged.len(), 2);
    }

    #[test]
    fn test_exactly_500ms_is_kept() {
        let merge = merge_points(&[at_ms(0)], &[at_ms(500), at_ms(-500)]);
        assert_eq!(merge.added_count(), 2);
    }

    #[test]
    fn test_duplicate_ignores_coordinates() {
        let stored = vec![at_ms(0)];
        let moved = LocationSample::new(1.0, 1.0, t0() + Duration::milliseconds(200));
        let merge = merge_points(&stored, &[moved]);
        assert_eq!(merge.added_count(), 0);
        assert_eq!(merge.merged, stored);
    }

    #[test]
    fn test_existing_sequence_never_reordered() {
        let stored = vec![at_ms(5000), at_ms(1000), at_ms(3000)];
        let merge = merge_points(&stored, &[at_ms(2000), at_ms(9000)]);
        assert_eq!(&merge.merged[..3], &stored[..]);
        assert_eq!(merge.merged[3], at_ms(2000));
        assert_eq!(merge.merged[4], at_ms(9000));
    }

    #[test]
    fn test_remerge_is_idempotent() {
        let batch = vec![at_ms(0), at_ms(1000), at_ms(2000)];
        let first = merge_points(&[], &batch);
        let second = merge_points(&first.merged, &batch);
        assert_eq!(second.added_count(), 0);
        assert_eq!(second.merged, first.merged);
    }

    #[test]
    fn test_event_dedup_is_type_agnostic() {
        // Observed behavior: events of different kinds within tolerance are merged.
        let violation = DrivingEvent::new(DrivingEventKind::SpeedViolation, 0.0, 0.0, t0());
        let payment = DrivingEvent::new(DrivingEventKind::Payment, 0.0, 0.0, t0() + Duration::milliseconds(300))
            .with_value(20.0);

        let (merged, added) = merge_events(&[violation.clone()], &[payment]);
        assert_eq!(added, 0);
        assert_eq!(merged, vec![violation]);
    }

    #[test]
    fn test_event_merge_appends_new() {
        let a = DrivingEvent::new(DrivingEventKind::StartTrip, 0.0, 0.0, t0());
        let b = DrivingEvent::new(DrivingEventKind::HarshBrake, 0.0, 0.0, t0() + Duration::seconds(30));
        let (merged, added) = merge_events(&[a.clone()], &[a.clone(), b.clone()]);
        assert_eq!(added, 1);
        assert_eq!(merged, vec![a, b]);
    }
}

//! Session merge orchestration.
//!
//! [`SessionSync`] is the only mutation path for a [`TrackingSession`]. Each
//! call is one read-modify-write against the store:
//!
//! 1. Look the session up by id
//! 2. Create it if absent (start/end time from the incoming batch)
//! 3. Merge points and events, dropping duplicates
//! 4. Recompute statistics and `end_time` over the full sequence
//! 5. Write the whole record once
//!
//! Calls for the same session id are serialized through a per-session lock so
//! two devices (or two retries) syncing the same session cannot overwrite each
//! other's points. Calls for different sessions never contend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::TrackingError;
use crate::normalizer::{merge_events, merge_points};
use crate::query::find_session;
use crate::store::SessionStore;
use crate::{DrivingEvent, LocationSample, TrackingSession};

// ============================================================================
// Requests and outcomes
// ============================================================================

/// Lifecycle of a session as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No record with this id yet
    Absent,
    /// Accepting points
    Open,
    /// Carries an end-of-trip event; further merges are unexpected but allowed
    Closed,
}

impl SessionState {
    pub fn of(session: Option<&TrackingSession>) -> Self {
        session.map_or(SessionState::Absent, TrackingSession::state)
    }
}

/// Incoming batch for the Sync operation.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub session_id: String,
    pub owner_id: String,
    pub points: Vec<LocationSample>,
    pub events: Vec<DrivingEvent>,
}

impl SyncRequest {
    pub fn new(
        session_id: impl Into<String>,
        owner_id: impl Into<String>,
        points: Vec<LocationSample>,
        events: Vec<DrivingEvent>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            owner_id: owner_id.into(),
            points,
            events,
        }
    }
}

/// Result of a Sync call.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The record as written
    pub session: TrackingSession,
    /// Points stored after the merge
    pub total_points: usize,
    /// Points this call actually added
    pub added_points: usize,
    pub added_events: usize,
    /// True when this call created the session
    pub created: bool,
}

/// Incoming batch for the Append operation.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub session_id: String,
    pub owner_id: String,
    pub points: Vec<LocationSample>,
    /// Client-side distance estimate in km; logged, never stored
    pub total_distance_hint: Option<f64>,
}

/// Result of an Append call.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub session: TrackingSession,
    /// False when a session with this id already existed and was left untouched
    pub created: bool,
}

// ============================================================================
// Per-session locks
// ============================================================================

/// Lock table keyed by session id. Entries are dropped once no caller holds them.
#[derive(Debug, Default)]
struct SessionLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    fn with_lock<T>(&self, session_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut table = self.table.lock();
            Arc::clone(
                table
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        // Prunes the entry on every exit path, unwinding included.
        let _entry = LockEntry {
            locks: self,
            session_id,
            lock: &lock,
        };

        let _guard = lock.lock();
        f()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().len()
    }
}

/// Removes an idle table entry when dropped.
struct LockEntry<'a> {
    locks: &'a SessionLocks,
    session_id: &'a str,
    lock: &'a Arc<Mutex<()>>,
}

impl Drop for LockEntry<'_> {
    fn drop(&mut self) {
        let mut table = self.locks.table.lock();
        // One reference in the table plus ours: nobody else is waiting on it.
        if Arc::strong_count(self.lock) == 2 {
            table.remove(self.session_id);
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Merges incoming batches into persisted sessions.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use route_tracker::{LocationSample, MemoryStore, SessionSync, SyncRequest};
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
/// let sync = SessionSync::new(MemoryStore::new());
/// let batch = vec![LocationSample::new(-0.18, -78.46, t)];
///
/// let first = sync.merge_incoming_points(SyncRequest::new("s-1", "agent-7", batch.clone(), vec![])).unwrap();
/// let again = sync.merge_incoming_points(SyncRequest::new("s-1", "agent-7", batch, vec![])).unwrap();
///
/// assert_eq!(first.added_points, 1);
/// assert_eq!(again.added_points, 0);
/// assert_eq!(again.total_points, 1);
/// ```
pub struct SessionSync<S: SessionStore> {
    store: S,
    locks: SessionLocks,
}

impl<S: SessionStore> SessionSync<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: SessionLocks::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Merge a batch of points and events into the session `session_id`,
    /// creating it if needed, and persist the result with a single write.
    ///
    /// Retrying a call is safe: points already stored are dropped as
    /// duplicates, so `added_points` is 0 and statistics are unchanged.
    pub fn merge_incoming_points(&self, request: SyncRequest) -> Result<SyncOutcome, TrackingError> {
        validate_ids(&request.session_id, &request.owner_id)?;
        validate_points(&request.points)?;

        self.locks.with_lock(&request.session_id, || {
            let existing = self.store.get(&request.session_id)?;
            let state = SessionState::of(existing.as_ref());
            let now = Utc::now();

            let mut session = match existing {
                Some(session) => {
                    if session.owner_id != request.owner_id {
                        warn!(
                            "[SessionSync] Session {} belongs to {}, sync sent by {}",
                            session.session_id, session.owner_id, request.owner_id
                        );
                    }
                    if state == SessionState::Closed {
                        warn!("[SessionSync] Merging into closed session {}", session.session_id);
                    }
                    session
                }
                None => new_session(&request.session_id, &request.owner_id, &request.points, now),
            };

            let (added_points, added_events) =
                apply_batch(&mut session, &request.points, &request.events);
            session.synced_at = Some(now);

            self.store.put(&session)?;

            info!(
                "[SessionSync] {} {}: received {} points, added {} (total {}), added {} events",
                if state == SessionState::Absent { "Created" } else { "Updated" },
                session.session_id,
                request.points.len(),
                added_points,
                session.points.len(),
                added_events
            );

            Ok(SyncOutcome {
                total_points: session.points.len(),
                added_points,
                added_events,
                created: state == SessionState::Absent,
                session,
            })
        })
    }

    /// Create a session from a batch unless one with this id already exists.
    ///
    /// An existing session is returned untouched (first write wins) and no
    /// write happens.
    pub fn append(&self, request: AppendRequest) -> Result<AppendOutcome, TrackingError> {
        validate_ids(&request.session_id, &request.owner_id)?;
        validate_points(&request.points)?;

        self.locks.with_lock(&request.session_id, || {
            if let Some(session) = self.store.get(&request.session_id)? {
                debug!("[SessionSync] Append for existing session {} ignored", session.session_id);
                return Ok(AppendOutcome { session, created: false });
            }

            let now = Utc::now();
            let mut session = new_session(&request.session_id, &request.owner_id, &request.points, now);
            apply_batch(&mut session, &request.points, &[]);
            session.synced_at = Some(now);

            if let Some(hint) = request.total_distance_hint {
                let computed = session.total_distance_km;
                if (hint - computed).abs() > 0.1 * computed.max(0.01) {
                    debug!(
                        "[SessionSync] Client distance hint {:.3} km differs from computed {:.3} km",
                        hint, computed
                    );
                }
            }

            self.store.put(&session)?;
            info!(
                "[SessionSync] Appended new session {} with {} points",
                session.session_id,
                session.points.len()
            );

            Ok(AppendOutcome { session, created: true })
        })
    }

    /// Fetch a session by id; absence is an error here.
    pub fn session(&self, session_id: &str) -> Result<TrackingSession, TrackingError> {
        find_session(&self.store, session_id)
    }
}

fn new_session(
    session_id: &str,
    owner_id: &str,
    points: &[LocationSample],
    now: DateTime<Utc>,
) -> TrackingSession {
    let start_time = points.first().map_or(now, |p| p.timestamp);
    TrackingSession::new(session_id, owner_id, start_time, now)
}

/// Merge points and events into `session` and refresh derived fields.
fn apply_batch(
    session: &mut TrackingSession,
    points: &[LocationSample],
    events: &[DrivingEvent],
) -> (usize, usize) {
    let was_empty = session.points.is_empty();
    let merge = merge_points(&session.points, points);
    let added_points = merge.added_count();
    session.points = merge.merged;

    // A session opened by an events-only batch starts at its first fix.
    if was_empty {
        if let Some(first) = session.points.first() {
            session.start_time = first.timestamp;
        }
    }

    let (merged_events, added_events) = merge_events(&session.events, events);
    session.events = merged_events;

    session.refresh_stats();
    (added_points, added_events)
}

fn validate_ids(session_id: &str, owner_id: &str) -> Result<(), TrackingError> {
    if owner_id.trim().is_empty() {
        return Err(TrackingError::InvalidInput("ownerId is required".to_string()));
    }
    if session_id.trim().is_empty() {
        return Err(TrackingError::InvalidInput("sessionId is required".to_string()));
    }
    Ok(())
}

fn validate_points(points: &[LocationSample]) -> Result<(), TrackingError> {
    match points.iter().position(|p| !p.is_valid()) {
        Some(i) => Err(TrackingError::InvalidInput(format!("point {} has invalid coordinates", i))),
        None => Ok(()),
    }
}

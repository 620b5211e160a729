//! Read-only session queries.

use chrono::{FixedOffset, NaiveDate};
use log::debug;

use crate::error::TrackingError;
use crate::store::SessionStore;
use crate::TrackingSession;

/// Sessions of `owner_id` that started on `date` in the owner's local calendar,
/// newest first.
///
/// Agents work on a fixed local offset, so a session started at 23:30 local
/// time belongs to that local day even though its UTC date is the next one.
///
/// # Example
///
/// ```rust
/// use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
/// use route_tracker::query::sessions_for_local_date;
/// use route_tracker::{MemoryStore, SessionStore, TrackingSession};
///
/// let store = MemoryStore::new();
/// // 02:00 UTC on the 2nd is 21:00 on the 1st at UTC-5
/// let t = Utc.with_ymd_and_hms(2024, 3, 2, 2, 0, 0).unwrap();
/// store.put(&TrackingSession::new("s-1", "agent-7", t, t)).unwrap();
///
/// let offset = FixedOffset::west_opt(5 * 3600).unwrap();
/// let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
/// let found = sessions_for_local_date(&store, "agent-7", day, offset).unwrap();
/// assert_eq!(found.len(), 1);
/// ```
pub fn sessions_for_local_date<S: SessionStore + ?Sized>(
    store: &S,
    owner_id: &str,
    date: NaiveDate,
    utc_offset: FixedOffset,
) -> Result<Vec<TrackingSession>, TrackingError> {
    if owner_id.trim().is_empty() {
        return Err(TrackingError::InvalidInput("ownerId is required".to_string()));
    }

    let mut sessions: Vec<TrackingSession> = store
        .list_by_owner(owner_id)?
        .into_iter()
        .filter(|s| s.start_time.with_timezone(&utc_offset).date_naive() == date)
        .collect();

    sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));

    debug!("[Query] {} sessions for {} on {}", sessions.len(), owner_id, date);
    Ok(sessions)
}

/// Look a session up by id; a missing session is [`TrackingError::NotFound`].
pub fn find_session<S: SessionStore + ?Sized>(
    store: &S,
    session_id: &str,
) -> Result<TrackingSession, TrackingError> {
    store
        .get(session_id)?
        .ok_or_else(|| TrackingError::NotFound(session_id.to_string()))
}

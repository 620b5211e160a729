//! Session persistence.
//!
//! The document store is an external collaborator reached through the narrow
//! [`SessionStore`] seam: fetch by session id, write a whole record, list by
//! owner. Two adapters ship with the crate:
//!
//! - [`MemoryStore`] - process-local map, used by tests and the `memory` backend
//! - [`JsonFileStore`] - one JSON document per session in a directory

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::error::TrackingError;
use crate::TrackingSession;

/// Get/put access to persisted sessions.
///
/// Implementations report every backend failure as
/// [`TrackingError::StoreUnavailable`]; absence is `Ok(None)`, not an error.
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str) -> Result<Option<TrackingSession>, TrackingError>;

    /// Write the full record, replacing any previous version.
    fn put(&self, session: &TrackingSession) -> Result<(), TrackingError>;

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TrackingSession>, TrackingError>;
}

impl<S: SessionStore + ?Sized> SessionStore for Box<S> {
    fn get(&self, session_id: &str) -> Result<Option<TrackingSession>, TrackingError> {
        (**self).get(session_id)
    }

    fn put(&self, session: &TrackingSession) -> Result<(), TrackingError> {
        (**self).put(session)
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TrackingSession>, TrackingError> {
        (**self).list_by_owner(owner_id)
    }
}

impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    fn get(&self, session_id: &str) -> Result<Option<TrackingSession>, TrackingError> {
        (**self).get(session_id)
    }

    fn put(&self, session: &TrackingSession) -> Result<(), TrackingError> {
        (**self).put(session)
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TrackingSession>, TrackingError> {
        (**self).list_by_owner(owner_id)
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Process-local store. Counts reads and writes so callers can check access patterns.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, TrackingSession>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `put` calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, session_id: &str) -> Result<Option<TrackingSession>, TrackingError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.sessions.read().get(session_id).cloned())
    }

    fn put(&self, session: &TrackingSession) -> Result<(), TrackingError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TrackingSession>, TrackingError> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// One pretty-printed JSON document per session, named `<session_id>.json`.
///
/// Writes land in a temporary file that is renamed over the target, so a
/// record is either fully replaced or left untouched.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| unavailable(&dir, e))?;
        info!("[JsonFileStore] Using {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, TrackingError> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{}.json", session_id)))
    }

    fn read_record(path: &Path) -> Result<Option<TrackingSession>, TrackingError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| TrackingError::StoreUnavailable(format!("corrupt record {}: {}", path.display(), e)))
    }
}

impl SessionStore for JsonFileStore {
    fn get(&self, session_id: &str) -> Result<Option<TrackingSession>, TrackingError> {
        let path = self.path_for(session_id)?;
        Self::read_record(&path)
    }

    fn put(&self, session: &TrackingSession) -> Result<(), TrackingError> {
        let path = self.path_for(&session.session_id)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(session)?;

        fs::write(&tmp, &bytes).map_err(|e| unavailable(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(unavailable(&path, e));
        }

        debug!(
            "[JsonFileStore] Wrote {} ({} points, {} bytes)",
            session.session_id,
            session.points.len(),
            bytes.len()
        );
        Ok(())
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TrackingSession>, TrackingError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| unavailable(&self.dir, e))?;
        let mut sessions = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| unavailable(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(Some(session)) if session.owner_id == owner_id => sessions.push(session),
                Ok(_) => {}
                Err(e) => warn!("[JsonFileStore] Skipping {}: {}", path.display(), e),
            }
        }

        Ok(sessions)
    }
}

fn unavailable(path: &Path, err: io::Error) -> TrackingError {
    TrackingError::StoreUnavailable(format!("{}: {}", path.display(), err))
}

/// Session ids become file names, so only `[A-Za-z0-9_.-]` is accepted.
pub fn validate_session_id(session_id: &str) -> Result<(), TrackingError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id != "."
        && session_id != ".."
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(TrackingError::InvalidInput(format!("invalid sessionId: {:?}", session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn session(id: &str, owner: &str) -> TrackingSession {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
        TrackingSession::new(id, owner, t, t)
    }

    #[test]
    fn test_memory_store_roundtrip_and_counts() {
        let store = MemoryStore::new();
        assert!(store.get("s-1").unwrap().is_none());
        store.put(&session("s-1", "agent-7")).unwrap();
        store.put(&session("s-2", "agent-8")).unwrap();

        assert_eq!(store.get("s-1").unwrap().unwrap().owner_id, "agent-7");
        assert_eq!(store.read_count(), 2);
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.len(), 2);

        let owned = store.list_by_owner("agent-8").unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].session_id, "s-2");
    }

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("1709301234567-abc_DEF.v2").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("..").is_err());
        assert!(validate_session_id("../etc/passwd").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id(&"x".repeat(129)).is_err());
    }
}

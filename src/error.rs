//! Error types for Route Tracker

use thiserror::Error;

/// Errors surfaced by ingestion, queries and exports
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Request rejected before any store access
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persistence backend unreachable, misconfigured or returning bad data
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Export error: {0}")]
    Export(String),

    /// Listener could not be bound or the runtime failed
    #[error("Server error: {0}")]
    Server(String),
}

impl TrackingError {
    /// True for errors caused by the caller's request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TrackingError::InvalidInput(_) | TrackingError::NotFound(_) | TrackingError::Json(_)
        )
    }
}

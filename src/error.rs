// ABOUTME: Error taxonomy for the change-detection and delivery pipeline
// ABOUTME: Distinguishes per-entity, per-event, startup and shutdown failures

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A snapshot field has a shape that cannot be normalized. Fatal for that
    /// one hash computation only.
    #[error("cannot canonicalize {entity_type}.{field}: {reason}")]
    Type {
        entity_type: String,
        field: String,
        reason: String,
    },

    /// Required configuration or identity is missing. Aborts startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Applying a single sync event failed.
    #[error("failed to apply message {message_id}: {source:#}")]
    Apply {
        message_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("message consumer did not stop within {waited_secs}s")]
    ShutdownTimeout { waited_secs: u64 },

    #[error("message consumer is already running")]
    AlreadyRunning,

    /// Hash store, queue or replica I/O failure.
    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    pub fn type_error(entity_type: &str, field: &str, reason: impl Into<String>) -> Self {
        SyncError::Type {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Store(err.into())
    }
}

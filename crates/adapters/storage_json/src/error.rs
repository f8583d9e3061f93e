//! Storage-specific error type wrapping file and JSON errors.

use apparatus_app::error::PersistenceError;

/// Errors originating from the JSON file store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading or writing the file failed.
    #[error("file error")]
    Io(#[from] std::io::Error),

    /// The file content is not a valid saved state.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// The temporary file could not replace the target.
    #[error("could not replace state file")]
    Persist(#[from] tempfile::PersistError),

    /// The blocking file task did not complete.
    #[error("file task failed")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StorageError> for PersistenceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(io) => Self::Io(io),
            StorageError::Persist(persist) => Self::Io(persist.error),
            StorageError::Json(_) | StorageError::Task(_) => Self::Format(Box::new(err)),
        }
    }
}

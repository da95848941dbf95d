/// All errors that can be returned by a Waypoint store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The configuration document does not exist or cannot be located.
    #[error("configuration document not found: {path}")]
    DocumentNotFound { path: String },

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A backend-specific storage error (DB connection, I/O, lock poisoning, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

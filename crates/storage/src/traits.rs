use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{ExecutionRecord, VersionMarkerRecord};

/// Durable version markers kept alongside the application's data store.
///
/// Markers are addressed by name. The orchestrator only ever uses the
/// `"schema"` marker here; configuration and content share the version held
/// by the configuration document (see [`ConfigStore`]).
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` so a host can hand the same store to
/// the orchestrator and to migration handlers behind an `Arc`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read a marker. Returns `Ok(None)` when the marker was never recorded.
    async fn get_marker(&self, name: &str) -> Result<Option<VersionMarkerRecord>, StorageError>;

    /// Create or replace a marker.
    async fn set_marker(&self, name: &str, record: VersionMarkerRecord)
        -> Result<(), StorageError>;
}

/// Append-only store of migration run audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one execution record.
    async fn insert_execution(&self, record: ExecutionRecord) -> Result<(), StorageError>;

    /// List execution records, newest first.
    ///
    /// - `limit`: maximum number of results (0 = no limit)
    async fn list_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StorageError>;
}

/// Accessor for the version field of the persisted configuration document.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the version recorded in the configuration document.
    ///
    /// Returns `Ok(None)` when the document carries no version.
    async fn config_version(&self) -> Result<Option<String>, StorageError>;

    /// Write the version field, leaving the rest of the document intact.
    async fn set_config_version(&self, version: &str) -> Result<(), StorageError>;
}

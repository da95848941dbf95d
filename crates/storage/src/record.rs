use serde::{Deserialize, Serialize};

/// A durably recorded version marker for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarkerRecord {
    /// Semantic version string, e.g. `"1.2.0"`.
    pub version: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub recorded_at: String,
}

/// The audit record written once per migration run.
///
/// Immutable after it is inserted: stores only ever append these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub initial_version: String,
    pub target_version: String,
    /// Newline-joined detail lines, one per attempted unit.
    pub details: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

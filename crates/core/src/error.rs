//! Error taxonomy for a migration run.
//!
//! Pre-flight errors ([`ConfigError`], [`DiscoveryError`]) are raised before
//! anything is mutated. Unit failures are not errors at this level: they are
//! aggregated into the execution report. [`PersistenceFailure`] is logged by
//! the orchestrator and never escalates.

use waypoint_storage::StorageError;

use crate::orchestrator::RunReport;
use crate::unit::Domain;
use crate::version::VersionParseError;

/// Where a requested target version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOrigin {
    ExplicitOverride,
    EnvironmentDirective,
}

impl std::fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetOrigin::ExplicitOverride => f.write_str("explicit target override"),
            TargetOrigin::EnvironmentDirective => f.write_str("environment target directive"),
        }
    }
}

/// Version resolution failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {origin}: {source}")]
    InvalidTarget {
        origin: TargetOrigin,
        #[source]
        source: VersionParseError,
    },

    /// A persisted marker holds something that is not a version.
    #[error("stored {marker} version is corrupt: {source}")]
    CorruptMarker {
        marker: String,
        #[source]
        source: VersionParseError,
    },

    #[error("could not read version markers: {0}")]
    Store(#[from] StorageError),
}

/// The migration catalog could not be assembled.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("malformed migration descriptor '{identifier}': {reason}")]
    MalformedDescriptor { identifier: String, reason: String },

    #[error("migration '{identifier}' is provided by both {first} and {second}")]
    DuplicateIdentifier {
        identifier: String,
        first: String,
        second: String,
    },

    /// Two units in one domain share version and timestamp.
    #[error(
        "{domain} migrations '{first}' and '{second}' share version {version} and timestamp {timestamp}"
    )]
    OrderingCollision {
        domain: Domain,
        version: String,
        timestamp: u64,
        first: String,
        second: String,
    },

    #[error("no handler registered for migration '{identifier}'")]
    UnregisteredHandler { identifier: String },

    #[error("cannot read migration source {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// One or more writes in the recording phase failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to persist migration status: {}", .failures.join("; "))]
pub struct PersistenceFailure {
    pub failures: Vec<String>,
}

/// Top-level error returned by [`crate::Orchestrator::run`].
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Units failed in strict mode; the host must not start serving.
    ///
    /// Carries the full report so the host can still display what ran.
    #[error("migration run failed in strict mode: {} unit(s) failed", .0.failure_count())]
    FatalAbort(Box<RunReport>),
}

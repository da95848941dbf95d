//! waypoint-core: versioned migration orchestrator.
//!
//! Advances (or reverts) the durable state of a long-lived application
//! across releases. Three version markers are tracked independently
//! (schema, configuration, content); each run resolves them, plans the
//! units that lie between the current marker and the target, runs those
//! units one at a time, and records the outcome.
//!
//! # Public API
//!
//! - [`Orchestrator`] -- the run entry point, built from the components below
//! - [`VersionResolver`] -- current markers and target version
//! - [`MigrationCatalog`] -- unit discovery from [`CatalogSource`]s plus
//!   lazy handler loading from a [`HandlerRegistry`]
//! - [`plan()`] -- interval filtering and timestamp ordering
//! - [`Executor`] -- sequential execution with failure containment
//! - [`StatusRecorder`] -- audit record and marker advancement
//! - [`PlanSummary`] -- operator-facing plan rendering
//!
//! Stores are the traits from `waypoint-storage`, injected as `Arc<dyn _>`.

pub mod catalog;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod recorder;
pub mod resolver;
pub mod scheduler;
pub mod summary;
pub mod unit;
pub mod version;

// ── Convenience re-exports: key types ────────────────────────────────

pub use catalog::{
    CatalogSource, DescriptorEntry, DirectorySource, HandlerRegistry, MigrationCatalog,
    StaticSource,
};
pub use error::{
    ConfigError, DiscoveryError, MigrationError, PersistenceFailure, TargetOrigin,
};
pub use executor::{ExecutionOptions, ExecutionReport, Executor, UnitOutcome};
pub use orchestrator::{Orchestrator, RunDirectives, RunReport, RunStatus, StatusReport};
pub use recorder::{PersistSummary, StatusRecorder};
pub use resolver::{TargetOverrides, VersionResolver, VersionState, SCHEMA_MARKER};
pub use scheduler::{plan, Direction, Plan};
pub use summary::{DomainGroup, PlanSummary, PlannedUnit};
pub use unit::{
    Domain, HandlerError, HandlerResult, MigrationContext, MigrationHandler, MigrationOutcome,
    MigrationUnit, Scope, ServiceRegistry,
};
pub use version::{Version, VersionParseError};

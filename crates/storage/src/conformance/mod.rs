//! Conformance test suite for Waypoint store implementations.
//!
//! This module provides a backend-agnostic test suite that any store
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Markers**: absent markers, create, replace, independence by name
//! - **Audit**: append-only inserts, newest-first listing, limits
//! - **Config**: version read/write on the configuration document
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store instance for each test:
//!
//! ```ignore
//! use waypoint_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async { SqliteStore::open_in_memory().unwrap() }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod audit;
mod config;
mod marker;

use std::fmt;
use std::future::Future;

use crate::record::{ExecutionRecord, VersionMarkerRecord};
use crate::{AuditStore, ConfigStore, MetadataStore};

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "marker", "audit", "config").
    pub category: String,
    /// Test name (e.g. "absent_marker_reads_none").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl ConformanceReport {
    fn from_results(results: Vec<TestResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        let total = results.len();
        ConformanceReport {
            results,
            passed,
            failed: total - passed,
            total,
        }
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the marker and audit suites against a metadata/audit backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: MetadataStore + AuditStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(marker::run_marker_tests(&factory).await);
    results.extend(audit::run_audit_tests(&factory).await);

    ConformanceReport::from_results(results)
}

/// Run the configuration-document suite against a [`ConfigStore`].
///
/// The factory must return a store whose document exists but carries no
/// version yet.
pub async fn run_config_conformance<C, F, Fut>(factory: F) -> ConformanceReport
where
    C: ConfigStore,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    ConformanceReport::from_results(config::run_config_tests(&factory).await)
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_marker(version: &str, recorded_at: &str) -> VersionMarkerRecord {
    VersionMarkerRecord {
        version: version.to_string(),
        recorded_at: recorded_at.to_string(),
    }
}

fn make_execution(initial: &str, target: &str, created_at: &str) -> ExecutionRecord {
    ExecutionRecord {
        initial_version: initial.to_string(),
        target_version: target.to_string(),
        details: format!("[schema] v{target}-1700000000-test: success"),
        created_at: created_at.to_string(),
    }
}

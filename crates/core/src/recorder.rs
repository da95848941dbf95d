//! Persistence of a run: the audit record and the version markers.

use std::sync::Arc;

use serde::Serialize;
use waypoint_storage::{
    AuditStore, ConfigStore, ExecutionRecord, MetadataStore, StorageError, VersionMarkerRecord,
};

use crate::error::PersistenceFailure;
use crate::executor::ExecutionReport;
use crate::resolver::{VersionState, SCHEMA_MARKER};
use crate::scheduler::Plan;
use crate::unit::Domain;

/// What the recording phase managed to write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub audit_written: bool,
    /// Domains whose marker now equals the run's target.
    pub advanced: Vec<Domain>,
}

pub struct StatusRecorder {
    metadata: Arc<dyn MetadataStore>,
    audit: Arc<dyn AuditStore>,
    config: Arc<dyn ConfigStore>,
}

impl StatusRecorder {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        audit: Arc<dyn AuditStore>,
        config: Arc<dyn ConfigStore>,
    ) -> Self {
        StatusRecorder {
            metadata,
            audit,
            config,
        }
    }

    /// Record a mutating run. Call exactly once per run that executed units.
    ///
    /// `plan` is what ran; `pending` is the unfiltered plan for the same
    /// versions and direction. The audit record is always attempted. Markers
    /// move to the target only when no unit failed, only for domains the
    /// plan touched, and only when every pending unit sharing the marker was
    /// in the plan. Every write is attempted even after an earlier one
    /// fails; all failures are returned together.
    pub async fn persist(
        &self,
        state: &VersionState,
        plan: &Plan,
        pending: &Plan,
        report: &ExecutionReport,
    ) -> Result<PersistSummary, PersistenceFailure> {
        let mut summary = PersistSummary::default();
        let mut failures = Vec::new();
        let now = now_rfc3339();
        let target = state.target_version.to_string();

        let record = ExecutionRecord {
            initial_version: state.config_version.to_string(),
            target_version: target.clone(),
            details: report.details(),
            created_at: now.clone(),
        };
        match self.audit.insert_execution(record).await {
            Ok(()) => summary.audit_written = true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to write migration audit record");
                failures.push(format!("audit record: {}", e));
            }
        }

        if report.had_failure {
            tracing::warn!(
                failures = report.failure_count(),
                "migration run had failures, version markers left unchanged"
            );
            return finish(summary, failures);
        }

        let advance_schema = marker_complete(plan, pending, &[Domain::Schema]);

        let config_domains: Vec<Domain> = [Domain::Config, Domain::Content]
            .into_iter()
            .filter(|d| plan.touches(*d))
            .collect();
        let advance_config = !config_domains.is_empty()
            && marker_complete(plan, pending, &[Domain::Config, Domain::Content]);

        if advance_schema {
            let marker = VersionMarkerRecord {
                version: target.clone(),
                recorded_at: now.clone(),
            };
            match self.metadata.set_marker(SCHEMA_MARKER, marker).await {
                Ok(()) => summary.advanced.push(Domain::Schema),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to advance schema version marker");
                    failures.push(format!("schema marker: {}", e));
                }
            }
        } else if advance_config {
            // The schema marker falls back to the config version when absent,
            // so it must exist before the config version moves.
            if let Err(e) = self.pin_schema_marker(state, &now).await {
                tracing::warn!(error = %e, "failed to pin schema version marker");
                failures.push(format!("schema marker: {}", e));
            }
        }

        if advance_config {
            match self.config.set_config_version(&target).await {
                Ok(()) => summary.advanced.extend(config_domains),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to advance configuration version");
                    failures.push(format!("config version: {}", e));
                }
            }
        }

        if !summary.advanced.is_empty() {
            tracing::info!(
                version = %target,
                domains = ?summary.advanced,
                "version markers advanced"
            );
        }
        finish(summary, failures)
    }

    async fn pin_schema_marker(&self, state: &VersionState, now: &str) -> Result<(), StorageError> {
        if self.metadata.get_marker(SCHEMA_MARKER).await?.is_some() {
            return Ok(());
        }
        tracing::debug!(
            version = %state.schema_version,
            "recording schema version marker before moving the config version"
        );
        let marker = VersionMarkerRecord {
            version: state.schema_version.to_string(),
            recorded_at: now.to_string(),
        };
        self.metadata.set_marker(SCHEMA_MARKER, marker).await
    }
}

/// Whether a marker shared by `domains` may move: the plan touched one of
/// them and every pending unit of those domains was part of the plan.
fn marker_complete(plan: &Plan, pending: &Plan, domains: &[Domain]) -> bool {
    if !domains.iter().any(|d| plan.touches(*d)) {
        return false;
    }
    let left_out: Vec<&str> = pending
        .units
        .iter()
        .filter(|u| domains.contains(&u.domain))
        .filter(|u| !plan.units.iter().any(|p| p.identifier == u.identifier))
        .map(|u| u.identifier.as_str())
        .collect();
    if left_out.is_empty() {
        return true;
    }
    tracing::warn!(
        domains = ?domains,
        units = ?left_out,
        "pending units were filtered out of this run, version marker left unchanged"
    );
    false
}

fn finish(
    summary: PersistSummary,
    failures: Vec<String>,
) -> Result<PersistSummary, PersistenceFailure> {
    if failures.is_empty() {
        Ok(summary)
    } else {
        Err(PersistenceFailure { failures })
    }
}

/// Current UTC time as RFC 3339.
pub(crate) fn now_rfc3339() -> String {
    let now = time::OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::UnitOutcome;
    use crate::scheduler::Direction;
    use crate::unit::{MigrationOutcome, MigrationUnit, Scope};
    use async_trait::async_trait;
    use waypoint_storage::MemoryStore;

    fn state() -> VersionState {
        VersionState {
            schema_version: "1.0.0".parse().unwrap(),
            config_version: "1.0.0".parse().unwrap(),
            target_version: "1.1.0".parse().unwrap(),
        }
    }

    fn plan(domains: &[Domain]) -> Plan {
        let units = domains
            .iter()
            .enumerate()
            .map(|(i, d)| {
                MigrationUnit::parse(&format!("v1_1_0-{}-unit", i + 1), *d, Scope::Core).unwrap()
            })
            .collect();
        Plan {
            direction: Direction::Up,
            units,
        }
    }

    fn report(plan: &Plan, fail: bool) -> ExecutionReport {
        let outcomes = plan
            .units
            .iter()
            .map(|u| UnitOutcome {
                identifier: u.identifier.clone(),
                domain: u.domain,
                scope: u.scope.clone(),
                outcome: if fail {
                    MigrationOutcome::failure("nope")
                } else {
                    MigrationOutcome::success()
                },
                skipped: false,
                elapsed_ms: 1,
            })
            .collect();
        ExecutionReport {
            outcomes,
            had_failure: fail,
        }
    }

    fn recorder(store: &MemoryStore) -> StatusRecorder {
        StatusRecorder::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
    }

    #[tokio::test]
    async fn success_advances_touched_domains_only() {
        let store = MemoryStore::with_config_version("1.0.0");
        let p = plan(&[Domain::Schema]);
        let summary = recorder(&store)
            .persist(&state(), &p, &p, &report(&p, false))
            .await
            .unwrap();

        assert!(summary.audit_written);
        assert_eq!(summary.advanced, [Domain::Schema]);
        let marker = store.get_marker(SCHEMA_MARKER).await.unwrap().unwrap();
        assert_eq!(marker.version, "1.1.0");
        assert_eq!(store.config_version().await.unwrap().as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn content_units_advance_config_version() {
        let store = MemoryStore::with_config_version("1.0.0");
        let p = plan(&[Domain::Content]);
        let summary = recorder(&store)
            .persist(&state(), &p, &p, &report(&p, false))
            .await
            .unwrap();

        assert_eq!(summary.advanced, [Domain::Content]);
        assert_eq!(store.config_version().await.unwrap().as_deref(), Some("1.1.0"));
        // pinned at the resolved schema version, not advanced
        let marker = store.get_marker(SCHEMA_MARKER).await.unwrap().unwrap();
        assert_eq!(marker.version, "1.0.0");
    }

    #[tokio::test]
    async fn failed_run_writes_audit_but_no_markers() {
        let store = MemoryStore::with_config_version("1.0.0");
        let p = plan(&[Domain::Schema, Domain::Config]);
        let summary = recorder(&store)
            .persist(&state(), &p, &p, &report(&p, true))
            .await
            .unwrap();

        assert!(summary.audit_written);
        assert!(summary.advanced.is_empty());
        assert!(store.get_marker(SCHEMA_MARKER).await.unwrap().is_none());
        assert_eq!(store.config_version().await.unwrap().as_deref(), Some("1.0.0"));

        let records = store.list_executions(0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].initial_version, "1.0.0");
        assert_eq!(records[0].target_version, "1.1.0");
        assert!(records[0].details.contains("failure (nope)"));
    }

    #[tokio::test]
    async fn filtered_out_units_hold_the_shared_config_marker() {
        let store = MemoryStore::with_config_version("1.0.0");
        let pending = plan(&[Domain::Config, Domain::Content]);
        let ran = Plan {
            direction: Direction::Up,
            units: pending.for_domain(Domain::Content).cloned().collect(),
        };
        let summary = recorder(&store)
            .persist(&state(), &ran, &pending, &report(&ran, false))
            .await
            .unwrap();

        assert!(summary.audit_written);
        assert!(summary.advanced.is_empty());
        assert_eq!(store.config_version().await.unwrap().as_deref(), Some("1.0.0"));
        assert!(store.get_marker(SCHEMA_MARKER).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn config_advance_pins_absent_schema_marker() {
        let store = MemoryStore::with_config_version("1.0.0");
        let pending = plan(&[Domain::Schema, Domain::Config]);
        let ran = Plan {
            direction: Direction::Up,
            units: pending.for_domain(Domain::Config).cloned().collect(),
        };
        let summary = recorder(&store)
            .persist(&state(), &ran, &pending, &report(&ran, false))
            .await
            .unwrap();

        assert_eq!(summary.advanced, [Domain::Config]);
        assert_eq!(store.config_version().await.unwrap().as_deref(), Some("1.1.0"));
        let marker = store.get_marker(SCHEMA_MARKER).await.unwrap().unwrap();
        assert_eq!(marker.version, "1.0.0");
    }

    #[tokio::test]
    async fn existing_schema_marker_is_not_rewritten_by_config_advance() {
        let store = MemoryStore::with_config_version("1.0.0");
        store
            .set_marker(
                SCHEMA_MARKER,
                VersionMarkerRecord {
                    version: "1.0.5".into(),
                    recorded_at: "2025-01-01T00:00:00Z".into(),
                },
            )
            .await
            .unwrap();
        let p = plan(&[Domain::Config]);
        recorder(&store)
            .persist(&state(), &p, &p, &report(&p, false))
            .await
            .unwrap();

        let marker = store.get_marker(SCHEMA_MARKER).await.unwrap().unwrap();
        assert_eq!(marker.version, "1.0.5");
        assert_eq!(marker.recorded_at, "2025-01-01T00:00:00Z");
    }

    struct BrokenAudit;

    #[async_trait]
    impl AuditStore for BrokenAudit {
        async fn insert_execution(&self, _record: ExecutionRecord) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk full".into()))
        }

        async fn list_executions(
            &self,
            _limit: usize,
        ) -> Result<Vec<ExecutionRecord>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn audit_failure_still_advances_markers() {
        let store = MemoryStore::with_config_version("1.0.0");
        let recorder = StatusRecorder::new(
            Arc::new(store.clone()),
            Arc::new(BrokenAudit),
            Arc::new(store.clone()),
        );
        let p = plan(&[Domain::Schema]);
        let err = recorder
            .persist(&state(), &p, &p, &report(&p, false))
            .await
            .unwrap_err();

        assert_eq!(err.failures.len(), 1);
        assert!(err.failures[0].contains("disk full"));
        let marker = store.get_marker(SCHEMA_MARKER).await.unwrap().unwrap();
        assert_eq!(marker.version, "1.1.0");
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let ts = now_rfc3339();
        let parsed =
            time::OffsetDateTime::parse(&ts, &time::format_description::well_known::Rfc3339);
        assert!(parsed.is_ok(), "{ts}");
    }
}

//! The migration entry point.
//!
//! [`Orchestrator::run`] drives one run from resolution to the failure
//! policy:
//!
//! 1. resolve versions (fails fast with [`ConfigError`](crate::ConfigError))
//! 2. honor `skip_all`
//! 3. discover the catalog and plan (fails fast with
//!    [`DiscoveryError`](crate::DiscoveryError))
//! 4. stop at an empty plan, a dry run, or a missing approval
//! 5. execute, persist, then apply the strict/failsafe policy
//!
//! Nothing is mutated before step 5.

use serde::Serialize;

use crate::catalog::MigrationCatalog;
use crate::error::MigrationError;
use crate::executor::{ExecutionOptions, Executor, UnitOutcome};
use crate::recorder::{PersistSummary, StatusRecorder};
use crate::resolver::{TargetOverrides, VersionResolver, VersionState};
use crate::scheduler::{self, Direction};
use crate::summary::PlanSummary;
use crate::unit::Domain;

/// Every switch for one run, gathered by the host before the run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunDirectives {
    /// Explicit target version; wins over `env_target`.
    pub target: Option<String>,
    /// Target version taken from the host environment.
    pub env_target: Option<String>,
    pub direction: Direction,
    pub dry_run: bool,
    /// Without this the run stops after planning.
    pub auto_approve: bool,
    /// Report unit failures as a degraded run instead of aborting.
    pub failsafe: bool,
    pub skip_all: bool,
    /// Identifier substrings to skip.
    pub ignore: Vec<String>,
    pub domain: Option<Domain>,
}

impl RunDirectives {
    /// Split a comma-separated ignore-list, dropping blanks.
    pub fn parse_ignore_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn overrides(&self) -> TargetOverrides {
        TargetOverrides {
            explicit: self.target.clone(),
            env_directive: self.env_target.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Skipped,
    NothingToDo,
    DryRun,
    AwaitingApproval,
    Completed,
    /// Units failed. Only returned as `Ok` in failsafe mode.
    Degraded,
}

impl RunStatus {
    /// Whether the run changed (or attempted to change) durable state.
    pub fn mutated(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub state: VersionState,
    pub summary: PlanSummary,
    pub outcomes: Vec<UnitOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<PersistSummary>,
    /// Writes that failed while recording; never fatal.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub persistence_errors: Vec<String>,
}

impl RunReport {
    fn unexecuted(status: RunStatus, state: VersionState, summary: PlanSummary) -> Self {
        RunReport {
            status,
            state,
            summary,
            outcomes: Vec::new(),
            persisted: None,
            persistence_errors: Vec::new(),
        }
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.skipped).count()
    }
}

/// Pending work without running anything.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: VersionState,
    pub pending: PlanSummary,
}

pub struct Orchestrator {
    resolver: VersionResolver,
    catalog: MigrationCatalog,
    executor: Executor,
    recorder: StatusRecorder,
}

impl Orchestrator {
    pub fn new(
        resolver: VersionResolver,
        catalog: MigrationCatalog,
        executor: Executor,
        recorder: StatusRecorder,
    ) -> Self {
        Orchestrator {
            resolver,
            catalog,
            executor,
            recorder,
        }
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    pub async fn run(&self, directives: &RunDirectives) -> Result<RunReport, MigrationError> {
        let state = self.resolver.resolve(&directives.overrides()).await?;
        tracing::info!(
            schema = %state.schema_version,
            config = %state.config_version,
            target = %state.target_version,
            direction = %directives.direction,
            "migration versions resolved"
        );

        if directives.skip_all {
            tracing::info!("all migrations skipped by directive");
            let empty = scheduler::Plan {
                direction: directives.direction,
                units: Vec::new(),
            };
            let summary = PlanSummary::new(&state, &empty);
            return Ok(RunReport::unexecuted(RunStatus::Skipped, state, summary));
        }

        let units = self.catalog.discover()?;
        let plan = scheduler::plan(&units, &state, directives.direction, directives.domain);
        let summary = PlanSummary::new(&state, &plan);

        if plan.is_empty() {
            tracing::info!("no migrations to run");
            return Ok(RunReport::unexecuted(RunStatus::NothingToDo, state, summary));
        }
        if directives.dry_run {
            tracing::info!(units = plan.len(), "dry run, nothing executed");
            return Ok(RunReport::unexecuted(RunStatus::DryRun, state, summary));
        }
        if !directives.auto_approve {
            tracing::info!(units = plan.len(), "migration plan awaiting approval");
            return Ok(RunReport::unexecuted(RunStatus::AwaitingApproval, state, summary));
        }

        let options = ExecutionOptions {
            ignore: directives.ignore.clone(),
            dry_run: false,
        };
        let execution = self.executor.run(&self.catalog, &plan, &options).await;

        let pending = match directives.domain {
            Some(_) => scheduler::plan(&units, &state, directives.direction, None),
            None => plan.clone(),
        };
        let (persisted, persistence_errors) =
            match self.recorder.persist(&state, &plan, &pending, &execution).await {
                Ok(summary) => (Some(summary), Vec::new()),
                Err(failure) => {
                    tracing::warn!(error = %failure, "migration status only partially recorded");
                    (None, failure.failures)
                }
            };

        let failed = execution.had_failure;
        let status = if failed {
            RunStatus::Degraded
        } else {
            RunStatus::Completed
        };

        let report = RunReport {
            status,
            state,
            summary,
            outcomes: execution.outcomes,
            persisted,
            persistence_errors,
        };

        if failed && !directives.failsafe {
            tracing::error!(
                failures = report.failure_count(),
                "migration failed in strict mode"
            );
            return Err(MigrationError::FatalAbort(Box::new(report)));
        }
        if failed {
            tracing::warn!(
                failures = report.failure_count(),
                "migration failed, continuing in failsafe mode"
            );
        } else {
            tracing::info!(units = report.outcomes.len(), "migration completed");
        }
        Ok(report)
    }

    /// Resolve versions and compute what a run toward the target would do.
    pub async fn status(
        &self,
        overrides: &TargetOverrides,
    ) -> Result<StatusReport, MigrationError> {
        let state = self.resolver.resolve(overrides).await?;
        let direction = if state.target_version < state.config_version {
            Direction::Down
        } else {
            Direction::Up
        };
        let units = self.catalog.discover()?;
        let plan = scheduler::plan(&units, &state, direction, None);
        let pending = PlanSummary::new(&state, &plan);
        Ok(StatusReport { state, pending })
    }
}

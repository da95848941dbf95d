//! CLI migrate, plan, status and history subcommands.
//!
//! Wires the orchestrator to the host's collaborators: the SQLite store for
//! the schema marker and audit log, the JSON configuration document, and
//! command-backed units discovered from `waypoint.toml`'s directories.

use std::path::Path;
use std::sync::Arc;

use waypoint_core::{
    Direction, Domain, Executor, HandlerRegistry, MigrationCatalog, MigrationContext,
    MigrationError, Orchestrator, RunDirectives, RunReport, RunStatus, StatusRecorder,
    TargetOverrides, UnitOutcome, VersionResolver,
};
use waypoint_storage::{AuditStore, ConfigStore, MetadataStore, StorageError};
use waypoint_storage_sqlite::SqliteStore;

use crate::config::WaypointConfig;
use crate::config_document::JsonConfigDocument;
use crate::script::{self, ScriptEnv};
use crate::{report_error, OutputFormat};

/// Environment variable holding a target version directive.
pub const TARGET_ENV: &str = "WAYPOINT_MIGRATION_TARGET";

pub const EXIT_OK: i32 = 0;
pub const EXIT_PREFLIGHT: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_AWAITING_APPROVAL: i32 = 3;

/// Flags of the `migrate` subcommand.
#[derive(Debug, Clone, Default)]
pub struct MigrateArgs {
    pub target: Option<String>,
    pub down: bool,
    pub dry_run: bool,
    pub yes: bool,
    pub failsafe: bool,
    pub skip_all: bool,
    pub ignore: Option<String>,
    pub domain: Option<Domain>,
}

impl MigrateArgs {
    fn directives(&self) -> RunDirectives {
        RunDirectives {
            target: self.target.clone(),
            env_target: env_target(),
            direction: if self.down {
                Direction::Down
            } else {
                Direction::Up
            },
            dry_run: self.dry_run,
            auto_approve: self.yes,
            failsafe: self.failsafe,
            skip_all: self.skip_all,
            ignore: self
                .ignore
                .as_deref()
                .map(RunDirectives::parse_ignore_list)
                .unwrap_or_default(),
            domain: self.domain,
        }
    }
}

fn env_target() -> Option<String> {
    std::env::var(TARGET_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

// ── Host wiring ───────────────────────────────────────────────────────

/// Whether a command may write durable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    /// Never creates the database; a missing one reads as empty.
    ReadOnly,
    Mutating,
}

fn open_store(config: &WaypointConfig, access: Access) -> Result<Arc<SqliteStore>, String> {
    let path = &config.app.database;
    let open_error =
        |e: StorageError| format!("could not open database '{}': {}", path.display(), e);

    if access == Access::ReadOnly && !path.exists() {
        tracing::debug!(
            database = %path.display(),
            "database not created yet, reading empty markers"
        );
        return SqliteStore::open_in_memory()
            .map(Arc::new)
            .map_err(open_error);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("could not create '{}': {}", parent.display(), e))?;
        }
    }
    SqliteStore::open_or_create(path)
        .map(Arc::new)
        .map_err(open_error)
}

/// Wire the orchestrator. With `load_units`, every descriptor is read and,
/// for mutating runs, the catalog is discovered before the database is
/// opened so a broken catalog leaves nothing behind.
fn open_orchestrator(
    config: &WaypointConfig,
    access: Access,
    load_units: bool,
) -> Result<Orchestrator, String> {
    let build_version = config.build_version()?;
    let env = ScriptEnv {
        database: config.app.database.clone(),
        config_document: config.app.config_document.clone(),
    };
    let registry = if load_units {
        script::build_registry(&config.sources(), &env)?
    } else {
        HandlerRegistry::new()
    };
    let catalog = MigrationCatalog::new(config.boxed_sources(), registry);
    if load_units && access == Access::Mutating {
        catalog.discover().map_err(|e| e.to_string())?;
    }

    let store = open_store(config, access)?;
    let document = JsonConfigDocument::new(&config.app.config_document);
    tracing::debug!(
        config_document = %document.path().display(),
        database = %config.app.database.display(),
        ?access,
        "host collaborators opened"
    );

    let config_store: Arc<dyn ConfigStore> = Arc::new(document);
    let metadata: Arc<dyn MetadataStore> = store.clone();
    let audit: Arc<dyn AuditStore> = store;

    let context = MigrationContext::new(Arc::clone(&config_store), Arc::clone(&metadata))
        .with_metadata(
            "build_version",
            serde_json::Value::String(build_version.to_string()),
        );

    Ok(Orchestrator::new(
        VersionResolver::new(
            Arc::clone(&config_store),
            Arc::clone(&metadata),
            build_version,
        ),
        catalog,
        Executor::new(context, config.app.cache_dirs.clone()),
        StatusRecorder::new(metadata, audit, config_store),
    ))
}

/// Load `waypoint.toml` and reject a bad target before anything else runs.
fn preflight(config_path: &Path, overrides: &TargetOverrides) -> Result<WaypointConfig, String> {
    let config = WaypointConfig::load(config_path)?;
    overrides.parse().map_err(|e| e.to_string())?;
    Ok(config)
}

// ── migrate / plan ────────────────────────────────────────────────────

/// Run the migrate subcommand and return the process exit code.
pub async fn cmd_migrate(
    config_path: &Path,
    args: &MigrateArgs,
    output: OutputFormat,
    quiet: bool,
) -> i32 {
    let directives = args.directives();
    let overrides = TargetOverrides {
        explicit: directives.target.clone(),
        env_directive: directives.env_target.clone(),
    };
    let access = if args.yes && !args.dry_run && !args.skip_all {
        Access::Mutating
    } else {
        Access::ReadOnly
    };
    let orchestrator = match preflight(config_path, &overrides)
        .and_then(|config| open_orchestrator(&config, access, !args.skip_all))
    {
        Ok(o) => o,
        Err(msg) => {
            report_error(&msg, output, quiet);
            return EXIT_PREFLIGHT;
        }
    };

    match orchestrator.run(&directives).await {
        Ok(report) => {
            print_report(&report, output, quiet);
            if report.status == RunStatus::AwaitingApproval {
                EXIT_AWAITING_APPROVAL
            } else {
                EXIT_OK
            }
        }
        Err(MigrationError::FatalAbort(report)) => {
            print_report(&report, output, quiet);
            report_error(
                &MigrationError::FatalAbort(report).to_string(),
                output,
                quiet,
            );
            EXIT_FATAL
        }
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            EXIT_PREFLIGHT
        }
    }
}

fn print_report(report: &RunReport, output: OutputFormat, quiet: bool) {
    match output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
            println!("{}", json);
        }
        OutputFormat::Text => {
            if !quiet {
                display_report_text(report);
            }
        }
    }
}

fn display_report_text(report: &RunReport) {
    match report.status {
        RunStatus::Skipped => {
            println!("Migrations skipped (--skip-all); version markers unchanged.");
            return;
        }
        RunStatus::NothingToDo => {
            println!(
                "Nothing to do: already at {}.",
                report.state.target_version
            );
            return;
        }
        _ => {}
    }

    println!("{}", report.summary);

    match report.status {
        RunStatus::DryRun => {
            println!();
            println!("Dry run: no migrations were executed.");
        }
        RunStatus::AwaitingApproval => {
            println!();
            println!("Re-run with --yes to apply this plan.");
        }
        _ => {
            println!();
            for outcome in &report.outcomes {
                println!("  {}", outcome_line(outcome));
            }
            println!();
            let failed = report.failure_count();
            let skipped = report.skipped_count();
            let applied = report.outcomes.len() - failed - skipped;
            if failed == 0 {
                println!(
                    "Migrated to {}: {} applied, {} skipped.",
                    report.state.target_version, applied, skipped
                );
            } else {
                println!(
                    "{} of {} unit(s) failed; version markers left unchanged.",
                    failed,
                    report.outcomes.len()
                );
            }
            for err in &report.persistence_errors {
                eprintln!("warning: {}", err);
            }
        }
    }
}

fn outcome_line(outcome: &UnitOutcome) -> String {
    let status = if outcome.skipped {
        "SKIP"
    } else if outcome.outcome.success {
        "OK"
    } else {
        "FAIL"
    };
    match &outcome.outcome.message {
        Some(msg) => format!(
            "[{}] {} ({} ms): {}",
            status, outcome.identifier, outcome.elapsed_ms, msg
        ),
        None => format!("[{}] {} ({} ms)", status, outcome.identifier, outcome.elapsed_ms),
    }
}

// ── status ────────────────────────────────────────────────────────────

pub async fn cmd_status(
    config_path: &Path,
    target: Option<String>,
    output: OutputFormat,
    quiet: bool,
) -> i32 {
    let overrides = TargetOverrides {
        explicit: target,
        env_directive: env_target(),
    };
    let orchestrator = match preflight(config_path, &overrides)
        .and_then(|config| open_orchestrator(&config, Access::ReadOnly, true))
    {
        Ok(o) => o,
        Err(msg) => {
            report_error(&msg, output, quiet);
            return EXIT_PREFLIGHT;
        }
    };
    let status = match orchestrator.status(&overrides).await {
        Ok(s) => s,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            return EXIT_PREFLIGHT;
        }
    };

    match output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&status)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
            println!("{}", json);
        }
        OutputFormat::Text => {
            if !quiet {
                println!("Schema version:  {}", status.state.schema_version);
                println!("Config version:  {}", status.state.config_version);
                println!("Target version:  {}", status.state.target_version);
                println!("Pending units:   {}", status.pending.total);
                if !status.pending.is_empty() {
                    println!();
                    println!("{}", status.pending);
                }
            }
        }
    }
    EXIT_OK
}

// ── history ───────────────────────────────────────────────────────────

pub async fn cmd_history(
    config_path: &Path,
    limit: usize,
    output: OutputFormat,
    quiet: bool,
) -> i32 {
    let store = match WaypointConfig::load(config_path)
        .and_then(|config| open_store(&config, Access::ReadOnly))
    {
        Ok(s) => s,
        Err(msg) => {
            report_error(&msg, output, quiet);
            return EXIT_PREFLIGHT;
        }
    };
    let records = match store.list_executions(limit).await {
        Ok(r) => r,
        Err(e) => {
            let msg = format!("could not read migration history: {}", e);
            report_error(&msg, output, quiet);
            return EXIT_PREFLIGHT;
        }
    };

    match output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&records)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
            println!("{}", json);
        }
        OutputFormat::Text => {
            if quiet {
                return EXIT_OK;
            }
            if records.is_empty() {
                println!("No migration runs recorded.");
            }
            for record in &records {
                println!(
                    "{}  {} -> {}",
                    record.created_at, record.initial_version, record.target_version
                );
                for line in record.details.lines() {
                    println!("    {}", line);
                }
            }
        }
    }
    EXIT_OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::MigrationOutcome;

    #[test]
    fn directives_from_flags() {
        let args = MigrateArgs {
            target: Some("1.4.0".into()),
            down: true,
            yes: true,
            ignore: Some("reindex, seed".into()),
            domain: Some(Domain::Content),
            ..MigrateArgs::default()
        };
        let d = args.directives();
        assert_eq!(d.target.as_deref(), Some("1.4.0"));
        assert_eq!(d.direction, Direction::Down);
        assert!(d.auto_approve);
        assert!(!d.failsafe);
        assert_eq!(d.ignore, vec!["reindex".to_string(), "seed".to_string()]);
        assert_eq!(d.domain, Some(Domain::Content));
    }

    #[test]
    fn outcome_lines() {
        let outcome = UnitOutcome {
            identifier: "v1_0_0-1-a".into(),
            domain: Domain::Schema,
            scope: waypoint_core::Scope::Core,
            outcome: MigrationOutcome::failure("locked"),
            skipped: false,
            elapsed_ms: 12,
        };
        assert_eq!(outcome_line(&outcome), "[FAIL] v1_0_0-1-a (12 ms): locked");
    }
}

//! Sequential execution of a plan.
//!
//! Units run one at a time in plan order; each handler is awaited to
//! completion before the next starts, so every unit sees the state left by
//! its predecessor. A failing unit never stops the plan: failures are
//! recorded and reported through [`ExecutionReport::had_failure`], and the
//! orchestrator decides afterwards what the host does about them.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::Serialize;

use crate::catalog::MigrationCatalog;
use crate::scheduler::{Direction, Plan};
use crate::unit::{
    Domain, MigrationContext, MigrationHandler, MigrationOutcome, MigrationUnit, Scope,
};

/// Per-run execution switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Units whose identifier contains any of these substrings are skipped.
    pub ignore: Vec<String>,
    pub dry_run: bool,
}

impl ExecutionOptions {
    fn ignores(&self, identifier: &str) -> bool {
        self.ignore
            .iter()
            .any(|pattern| !pattern.is_empty() && identifier.contains(pattern.as_str()))
    }
}

/// What happened to one planned unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub identifier: String,
    pub domain: Domain,
    pub scope: Scope,
    pub outcome: MigrationOutcome,
    pub skipped: bool,
    pub elapsed_ms: u64,
}

impl UnitOutcome {
    pub fn failed(&self) -> bool {
        !self.skipped && !self.outcome.success
    }

    /// One line of the audit record's details.
    pub fn detail_line(&self) -> String {
        let status = if self.skipped {
            "skipped"
        } else if self.outcome.success {
            "success"
        } else {
            "failure"
        };
        match &self.outcome.message {
            Some(msg) => format!("[{}] {}: {} ({})", self.domain, self.identifier, status, msg),
            None => format!("[{}] {}: {}", self.domain, self.identifier, status),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<UnitOutcome>,
    pub had_failure: bool,
}

impl ExecutionReport {
    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| o.failed())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Detail lines joined for the audit record.
    pub fn details(&self) -> String {
        self.outcomes
            .iter()
            .map(UnitOutcome::detail_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct Executor {
    context: MigrationContext,
    cache_dirs: Vec<PathBuf>,
}

impl Executor {
    pub fn new(context: MigrationContext, cache_dirs: Vec<PathBuf>) -> Self {
        Executor {
            context,
            cache_dirs,
        }
    }

    pub async fn run(
        &self,
        catalog: &MigrationCatalog,
        plan: &Plan,
        options: &ExecutionOptions,
    ) -> ExecutionReport {
        if options.dry_run || plan.is_empty() {
            return ExecutionReport::default();
        }

        self.clear_caches().await;

        let mut report = ExecutionReport::default();
        for unit in &plan.units {
            let outcome = self.run_unit(catalog, unit, plan.direction, options).await;
            if outcome.failed() {
                report.had_failure = true;
            }
            report.outcomes.push(outcome);
        }
        report
    }

    async fn run_unit(
        &self,
        catalog: &MigrationCatalog,
        unit: &MigrationUnit,
        direction: Direction,
        options: &ExecutionOptions,
    ) -> UnitOutcome {
        let started = Instant::now();
        let finish = |outcome: MigrationOutcome, skipped: bool| UnitOutcome {
            identifier: unit.identifier.clone(),
            domain: unit.domain,
            scope: unit.scope.clone(),
            outcome,
            skipped,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if options.ignores(&unit.identifier) {
            tracing::info!(identifier = %unit.identifier, "migration skipped by ignore-list");
            return finish(
                MigrationOutcome {
                    success: true,
                    message: Some("ignore-list".to_string()),
                },
                true,
            );
        }

        tracing::info!(
            identifier = %unit.identifier,
            domain = %unit.domain,
            scope = %unit.scope,
            %direction,
            "running migration"
        );

        let outcome = match catalog.load_handler(&unit.identifier) {
            Ok(handler) => self.invoke(handler, direction).await,
            Err(e) => MigrationOutcome::failure(e.to_string()),
        };

        let result = finish(outcome, false);
        if result.outcome.success {
            tracing::info!(
                identifier = %unit.identifier,
                elapsed_ms = result.elapsed_ms,
                "migration succeeded"
            );
        } else {
            tracing::error!(
                identifier = %unit.identifier,
                elapsed_ms = result.elapsed_ms,
                message = result.outcome.message.as_deref().unwrap_or(""),
                "migration failed"
            );
        }
        result
    }

    /// Invoke a handler, turning a raised error or a panic into a failure.
    async fn invoke(
        &self,
        handler: Arc<dyn MigrationHandler>,
        direction: Direction,
    ) -> MigrationOutcome {
        let ctx = &self.context;
        let call = async {
            match direction {
                Direction::Up => handler.up(ctx).await,
                Direction::Down => handler.down(ctx).await,
            }
        };
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => MigrationOutcome::failure(e.to_string()),
            Err(panic) => MigrationOutcome::failure(format!(
                "handler panicked: {}",
                panic_message(&*panic)
            )),
        }
    }

    /// Remove and recreate every cache directory. Failures are logged only.
    async fn clear_caches(&self) {
        for dir in &self.cache_dirs {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %e,
                        "could not clear cache directory"
                    );
                    continue;
                }
            }
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "could not recreate cache directory"
                );
            } else {
                tracing::debug!(path = %dir.display(), "cache directory cleared");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{HandlerRegistry, StaticSource};
    use crate::unit::HandlerResult;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use waypoint_storage::MemoryStore;

    /// Appends `name:direction` to a shared journal and returns a fixed result.
    struct Journaled {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Raise,
        Panic,
    }

    impl Journaled {
        fn respond(&self, direction: &str) -> HandlerResult {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, direction));
            match self.behavior {
                Behavior::Succeed => Ok(MigrationOutcome::success()),
                Behavior::Fail => Ok(MigrationOutcome::failure("column exists")),
                Behavior::Raise => Err("connection reset".into()),
                Behavior::Panic => panic!("boom"),
            }
        }
    }

    #[async_trait]
    impl MigrationHandler for Journaled {
        async fn up(&self, _ctx: &MigrationContext) -> HandlerResult {
            self.respond("up")
        }

        async fn down(&self, _ctx: &MigrationContext) -> HandlerResult {
            self.respond("down")
        }
    }

    fn context() -> MigrationContext {
        let store = MemoryStore::new();
        MigrationContext::new(Arc::new(store.clone()), Arc::new(store))
    }

    fn setup(
        units: &[(&'static str, Behavior)],
    ) -> (MigrationCatalog, Plan, Arc<Mutex<Vec<String>>>) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut source = StaticSource::new("test", Scope::Core);
        let mut registry = HandlerRegistry::new();
        for (name, behavior) in units {
            source = source.with(name, Domain::Schema);
            let handler = Journaled {
                name: *name,
                journal: Arc::clone(&journal),
                behavior: *behavior,
            };
            registry.register_instance(*name, true, Arc::new(handler));
        }
        let catalog = MigrationCatalog::new(vec![Box::new(source)], registry);
        let plan = Plan {
            direction: Direction::Up,
            units: catalog.discover().unwrap(),
        };
        (catalog, plan, journal)
    }

    #[tokio::test]
    async fn runs_units_sequentially_in_plan_order() {
        let (catalog, plan, journal) = setup(&[
            ("v1_1_0-100-a", Behavior::Succeed),
            ("v1_2_0-200-b", Behavior::Succeed),
        ]);
        let report = Executor::new(context(), Vec::new())
            .run(&catalog, &plan, &ExecutionOptions::default())
            .await;

        assert!(!report.had_failure);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(
            *journal.lock().unwrap(),
            ["v1_1_0-100-a:up", "v1_2_0-200-b:up"]
        );
    }

    #[tokio::test]
    async fn failure_does_not_stop_remaining_units() {
        let (catalog, plan, journal) = setup(&[
            ("v1_1_0-100-a", Behavior::Fail),
            ("v1_2_0-200-b", Behavior::Succeed),
        ]);
        let report = Executor::new(context(), Vec::new())
            .run(&catalog, &plan, &ExecutionOptions::default())
            .await;

        assert!(report.had_failure);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(journal.lock().unwrap().len(), 2);
        assert_eq!(
            report.outcomes[0].outcome.message.as_deref(),
            Some("column exists")
        );
        assert!(report.outcomes[1].outcome.success);
    }

    #[tokio::test]
    async fn raised_error_and_panic_become_failures() {
        let (catalog, plan, _journal) = setup(&[
            ("v1_1_0-100-raise", Behavior::Raise),
            ("v1_2_0-200-panic", Behavior::Panic),
            ("v1_3_0-300-after", Behavior::Succeed),
        ]);
        let report = Executor::new(context(), Vec::new())
            .run(&catalog, &plan, &ExecutionOptions::default())
            .await;

        assert_eq!(report.failure_count(), 2);
        assert_eq!(
            report.outcomes[0].outcome,
            MigrationOutcome::failure("connection reset")
        );
        assert_eq!(
            report.outcomes[1].outcome,
            MigrationOutcome::failure("handler panicked: boom")
        );
        assert!(report.outcomes[2].outcome.success);
    }

    #[tokio::test]
    async fn ignore_list_skips_without_invoking() {
        let (catalog, plan, journal) = setup(&[
            ("v1_1_0-100-slow-reindex", Behavior::Fail),
            ("v1_2_0-200-b", Behavior::Succeed),
        ]);
        let options = ExecutionOptions {
            ignore: vec!["reindex".to_string()],
            dry_run: false,
        };
        let report = Executor::new(context(), Vec::new())
            .run(&catalog, &plan, &options)
            .await;

        assert!(!report.had_failure);
        assert!(report.outcomes[0].skipped);
        assert_eq!(*journal.lock().unwrap(), ["v1_2_0-200-b:up"]);
        assert!(report.details().contains("v1_1_0-100-slow-reindex: skipped"));
    }

    #[tokio::test]
    async fn dry_run_invokes_nothing_and_keeps_caches() {
        let cache = tempfile::tempdir().unwrap();
        let cached_file = cache.path().join("compiled.bin");
        std::fs::write(&cached_file, b"stale").unwrap();

        let (catalog, plan, journal) = setup(&[("v1_1_0-100-a", Behavior::Succeed)]);
        let options = ExecutionOptions {
            ignore: Vec::new(),
            dry_run: true,
        };
        let report = Executor::new(context(), vec![cache.path().to_path_buf()])
            .run(&catalog, &plan, &options)
            .await;

        assert!(report.outcomes.is_empty());
        assert!(journal.lock().unwrap().is_empty());
        assert!(cached_file.exists());
    }

    #[tokio::test]
    async fn real_run_clears_cache_directories() {
        let cache = tempfile::tempdir().unwrap();
        let cached_file = cache.path().join("compiled.bin");
        std::fs::write(&cached_file, b"stale").unwrap();
        let missing = cache.path().join("never-created");

        let (catalog, plan, _journal) = setup(&[("v1_1_0-100-a", Behavior::Succeed)]);
        Executor::new(context(), vec![cache.path().to_path_buf(), missing.clone()])
            .run(&catalog, &plan, &ExecutionOptions::default())
            .await;

        assert!(!cached_file.exists());
        assert!(cache.path().is_dir());
        assert!(missing.is_dir());
    }

    #[tokio::test]
    async fn uncleanable_cache_entry_does_not_stop_the_run() {
        let root = tempfile::tempdir().unwrap();
        let not_a_dir = root.path().join("cache.lock");
        std::fs::write(&not_a_dir, b"held").unwrap();
        let cache = root.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        let cached_file = cache.join("compiled.bin");
        std::fs::write(&cached_file, b"stale").unwrap();

        let (catalog, plan, journal) = setup(&[
            ("v1_1_0-100-a", Behavior::Succeed),
            ("v1_2_0-200-b", Behavior::Succeed),
        ]);
        let report = Executor::new(context(), vec![not_a_dir.clone(), cache.clone()])
            .run(&catalog, &plan, &ExecutionOptions::default())
            .await;

        assert!(!report.had_failure);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(journal.lock().unwrap().len(), 2);
        // the file is left alone, later entries are still cleared
        assert!(not_a_dir.is_file());
        assert!(!cached_file.exists());
        assert!(cache.is_dir());
    }

    #[tokio::test]
    async fn down_direction_invokes_down_handler() {
        let (catalog, mut plan, journal) = setup(&[("v1_1_0-100-a", Behavior::Succeed)]);
        plan.direction = Direction::Down;
        Executor::new(context(), Vec::new())
            .run(&catalog, &plan, &ExecutionOptions::default())
            .await;
        assert_eq!(*journal.lock().unwrap(), ["v1_1_0-100-a:down"]);
    }
}

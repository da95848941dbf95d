//! Drives the orchestrator end to end from descriptors discovered on disk.
//!
//! Core and extension directories are laid out the way a host ships them;
//! handlers are registered in-process under the descriptor identifiers.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use waypoint_core::{
    CatalogSource, Direction, DirectorySource, Executor, HandlerRegistry, HandlerResult,
    MigrationCatalog, MigrationContext, MigrationError, MigrationHandler, MigrationOutcome,
    Orchestrator, RunDirectives, RunStatus, StatusRecorder, Version, VersionResolver,
    SCHEMA_MARKER,
};
use waypoint_storage::{AuditStore, ConfigStore, MemoryStore, MetadataStore};

/// Writes the build version it sees in the context into the journal.
struct Recording {
    name: String,
    journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MigrationHandler for Recording {
    async fn up(&self, ctx: &MigrationContext) -> HandlerResult {
        let build = ctx
            .metadata
            .get("build_version")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}@{}", self.name, build));
        Ok(MigrationOutcome::success_with(format!("{} applied", self.name)))
    }
}

fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, "up = \"true\"\n").unwrap();
}

fn sources(root: &Path) -> Vec<DirectorySource> {
    vec![
        DirectorySource::core(root.join("core")),
        DirectorySource::extension("billing", root.join("billing")),
    ]
}

fn build(root: &Path, store: &MemoryStore, journal: &Arc<Mutex<Vec<String>>>) -> Orchestrator {
    let mut registry = HandlerRegistry::new();
    for source in sources(root) {
        for entry in source.entries().unwrap() {
            let handler = Recording {
                name: entry.stem.clone(),
                journal: Arc::clone(journal),
            };
            registry.register_instance(entry.stem, false, Arc::new(handler));
        }
    }
    let boxed: Vec<Box<dyn CatalogSource>> = sources(root)
        .into_iter()
        .map(|s| Box::new(s) as Box<dyn CatalogSource>)
        .collect();

    let config: Arc<dyn ConfigStore> = Arc::new(store.clone());
    let metadata: Arc<dyn MetadataStore> = Arc::new(store.clone());
    let audit: Arc<dyn AuditStore> = Arc::new(store.clone());
    let context = MigrationContext::new(Arc::clone(&config), Arc::clone(&metadata))
        .with_metadata("build_version", serde_json::json!("2.0.0"));

    Orchestrator::new(
        VersionResolver::new(Arc::clone(&config), Arc::clone(&metadata), Version::new(2, 0, 0)),
        MigrationCatalog::new(boxed, registry),
        Executor::new(context, Vec::new()),
        StatusRecorder::new(metadata, audit, config),
    )
}

#[tokio::test]
async fn core_and_extension_units_interleave_by_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "core/schema/v1_5_0-300-add-ledger.toml");
    touch(dir.path(), "core/config/v2_0_0-500-new-defaults.toml");
    touch(dir.path(), "billing/schema/v1_5_0-400-invoice-table.toml");
    touch(dir.path(), "billing/content/v2_0_0-450-seed-plans.toml");
    touch(dir.path(), "core/schema/v1_0_0-100-baseline.toml");

    let store = MemoryStore::with_config_version("1.0.0");
    let journal = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = build(dir.path(), &store, &journal);

    let report = orchestrator
        .run(&RunDirectives {
            auto_approve: true,
            ..RunDirectives::default()
        })
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(
        *journal.lock().unwrap(),
        [
            "v1_5_0-300-add-ledger@2.0.0",
            "v1_5_0-400-invoice-table@2.0.0",
            "v2_0_0-450-seed-plans@2.0.0",
            "v2_0_0-500-new-defaults@2.0.0",
        ]
    );
    let schema = store.get_marker(SCHEMA_MARKER).await.unwrap().unwrap();
    assert_eq!(schema.version, "2.0.0");
    assert_eq!(store.config_version().await.unwrap().as_deref(), Some("2.0.0"));

    let records = store.list_executions(0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0]
        .details
        .contains("[content] v2_0_0-450-seed-plans: success (v2_0_0-450-seed-plans applied)"));
}

#[tokio::test]
async fn identifier_shared_by_core_and_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "core/schema/v1_5_0-300-add-ledger.toml");
    touch(dir.path(), "billing/schema/v1_5_0-300-add-ledger.toml");

    let store = MemoryStore::with_config_version("1.0.0");
    let journal = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = build(dir.path(), &store, &journal);

    let err = orchestrator
        .run(&RunDirectives {
            auto_approve: true,
            ..RunDirectives::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::Discovery(_)), "{err}");
    assert!(journal.lock().unwrap().is_empty());
    assert_eq!(store.execution_count(), 0);
}

#[tokio::test]
async fn downgrade_skips_units_registered_without_down() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "core/schema/v1_5_0-300-add-ledger.toml");

    let store = MemoryStore::with_config_version("2.0.0");
    let journal = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = build(dir.path(), &store, &journal);

    let report = orchestrator
        .run(&RunDirectives {
            target: Some("1.0.0".into()),
            direction: Direction::Down,
            auto_approve: true,
            ..RunDirectives::default()
        })
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::NothingToDo);
    assert!(journal.lock().unwrap().is_empty());
}

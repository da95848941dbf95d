//! Discovery of migration units and lazy loading of their handlers.
//!
//! Units come from [`CatalogSource`]s (the core location plus one per
//! extension). Handlers come from a [`HandlerRegistry`] populated at
//! startup and keyed by unit identifier, so finding a unit and invoking it
//! are separate concerns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::DiscoveryError;
use crate::unit::{Domain, MigrationHandler, MigrationUnit, Scope};
use crate::version::Version;

// ── Sources ──────────────────────────────────────────────────────────

/// A descriptor as found by a source, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorEntry {
    /// `<version>-<timestamp>-<title>`, without any file extension.
    pub stem: String,
    pub domain: Domain,
    pub path: Option<PathBuf>,
}

/// Capability that enumerates unit descriptors from one location.
pub trait CatalogSource: Send + Sync {
    /// Human-readable name used in errors and logs.
    fn label(&self) -> &str;

    fn scope(&self) -> Scope;

    fn entries(&self) -> Result<Vec<DescriptorEntry>, DiscoveryError>;
}

/// Scans `<root>/{schema,config,content}/` for descriptor files.
///
/// A missing root or domain directory contributes no units.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    label: String,
    root: PathBuf,
    scope: Scope,
    extension: String,
}

impl DirectorySource {
    pub fn core(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        DirectorySource {
            label: format!("core ({})", root.display()),
            root,
            scope: Scope::Core,
            extension: "toml".to_string(),
        }
    }

    pub fn extension(name: &str, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        DirectorySource {
            label: format!("extension '{}' ({})", name, root.display()),
            root,
            scope: Scope::Extension(name.to_string()),
            extension: "toml".to_string(),
        }
    }

    /// Only files with this extension are descriptors.
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CatalogSource for DirectorySource {
    fn label(&self) -> &str {
        &self.label
    }

    fn scope(&self) -> Scope {
        self.scope.clone()
    }

    fn entries(&self) -> Result<Vec<DescriptorEntry>, DiscoveryError> {
        let mut entries = Vec::new();
        for domain in Domain::ALL {
            let dir = self.root.join(domain.as_str());
            if !dir.is_dir() {
                continue;
            }
            let unreadable = |e: std::io::Error| DiscoveryError::Unreadable {
                path: dir.display().to_string(),
                reason: e.to_string(),
            };
            let mut found = Vec::new();
            for item in std::fs::read_dir(&dir).map_err(unreadable)? {
                let path = item.map_err(unreadable)?.path();
                if !path.is_file()
                    || path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str())
                {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    found.push(DescriptorEntry {
                        stem: stem.to_string(),
                        domain,
                        path: Some(path.clone()),
                    });
                }
            }
            found.sort_by(|a, b| a.stem.cmp(&b.stem));
            entries.extend(found);
        }
        Ok(entries)
    }
}

/// Fixed, in-memory descriptors.
#[derive(Debug, Clone)]
pub struct StaticSource {
    label: String,
    scope: Scope,
    entries: Vec<DescriptorEntry>,
}

impl StaticSource {
    pub fn new(label: &str, scope: Scope) -> Self {
        StaticSource {
            label: label.to_string(),
            scope,
            entries: Vec::new(),
        }
    }

    pub fn with(mut self, stem: &str, domain: Domain) -> Self {
        self.entries.push(DescriptorEntry {
            stem: stem.to_string(),
            domain,
            path: None,
        });
        self
    }
}

impl CatalogSource for StaticSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn scope(&self) -> Scope {
        self.scope.clone()
    }

    fn entries(&self) -> Result<Vec<DescriptorEntry>, DiscoveryError> {
        Ok(self.entries.clone())
    }
}

// ── Handler registry ─────────────────────────────────────────────────

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn MigrationHandler> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    reversible: bool,
    factory: HandlerFactory,
}

/// Handlers keyed by unit identifier.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; it runs at most once, when the unit is first loaded.
    pub fn register<F, H>(&mut self, identifier: impl Into<String>, reversible: bool, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: MigrationHandler + 'static,
    {
        let factory: HandlerFactory =
            Arc::new(move || Arc::new(factory()) as Arc<dyn MigrationHandler>);
        self.entries.insert(
            identifier.into(),
            Registration {
                reversible,
                factory,
            },
        );
    }

    /// Register an already-built handler.
    pub fn register_instance(
        &mut self,
        identifier: impl Into<String>,
        reversible: bool,
        handler: Arc<dyn MigrationHandler>,
    ) {
        let factory: HandlerFactory = Arc::new(move || Arc::clone(&handler));
        self.entries.insert(
            identifier.into(),
            Registration {
                reversible,
                factory,
            },
        );
    }

    pub fn is_reversible(&self, identifier: &str) -> Option<bool> {
        self.entries.get(identifier).map(|r| r.reversible)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn instantiate(&self, identifier: &str) -> Option<Arc<dyn MigrationHandler>> {
        self.entries.get(identifier).map(|r| (r.factory)())
    }
}

// ── Catalog ──────────────────────────────────────────────────────────

/// The set of migration units known to this process.
///
/// Discovery runs once; the result is cached for the life of the catalog.
pub struct MigrationCatalog {
    sources: Vec<Box<dyn CatalogSource>>,
    registry: HandlerRegistry,
    discovered: Mutex<Option<Vec<MigrationUnit>>>,
    loaded: Mutex<HashMap<String, Arc<dyn MigrationHandler>>>,
}

impl MigrationCatalog {
    pub fn new(sources: Vec<Box<dyn CatalogSource>>, registry: HandlerRegistry) -> Self {
        MigrationCatalog {
            sources,
            registry,
            discovered: Mutex::new(None),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// All units from all sources, ordered by timestamp ascending.
    pub fn discover(&self) -> Result<Vec<MigrationUnit>, DiscoveryError> {
        let mut cached = self.discovered.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(units) = cached.as_ref() {
            return Ok(units.clone());
        }

        let units = self.scan()?;
        tracing::debug!(
            units = units.len(),
            sources = self.sources.len(),
            "migration catalog discovered"
        );
        *cached = Some(units.clone());
        Ok(units)
    }

    fn scan(&self) -> Result<Vec<MigrationUnit>, DiscoveryError> {
        let mut by_id: HashMap<String, (String, MigrationUnit)> = HashMap::new();
        let mut by_slot: HashMap<(Domain, Version, u64), String> = HashMap::new();

        for source in &self.sources {
            for entry in source.entries()? {
                let mut unit = MigrationUnit::parse(&entry.stem, entry.domain, source.scope())?;
                unit.path = entry.path;

                if let Some((first_label, existing)) = by_id.get(&unit.identifier) {
                    if existing.domain == unit.domain && existing.scope == unit.scope {
                        tracing::debug!(
                            identifier = %unit.identifier,
                            source = source.label(),
                            "duplicate migration descriptor collapsed"
                        );
                        continue;
                    }
                    return Err(DiscoveryError::DuplicateIdentifier {
                        identifier: unit.identifier,
                        first: first_label.clone(),
                        second: source.label().to_string(),
                    });
                }

                let slot = (unit.domain, unit.version.clone(), unit.timestamp);
                if let Some(other) = by_slot.get(&slot) {
                    return Err(DiscoveryError::OrderingCollision {
                        domain: unit.domain,
                        version: unit.version.to_string(),
                        timestamp: unit.timestamp,
                        first: other.clone(),
                        second: unit.identifier,
                    });
                }

                unit.reversible = self.registry.is_reversible(&unit.identifier).ok_or_else(|| {
                    DiscoveryError::UnregisteredHandler {
                        identifier: unit.identifier.clone(),
                    }
                })?;

                by_slot.insert(slot, unit.identifier.clone());
                by_id.insert(
                    unit.identifier.clone(),
                    (source.label().to_string(), unit),
                );
            }
        }

        let mut units: Vec<MigrationUnit> = by_id.into_values().map(|(_, unit)| unit).collect();
        units.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        Ok(units)
    }

    /// Load the handler for `identifier`, instantiating it on first use.
    pub fn load_handler(
        &self,
        identifier: &str,
    ) -> Result<Arc<dyn MigrationHandler>, DiscoveryError> {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handler) = loaded.get(identifier) {
            return Ok(Arc::clone(handler));
        }
        let handler = self.registry.instantiate(identifier).ok_or_else(|| {
            DiscoveryError::UnregisteredHandler {
                identifier: identifier.to_string(),
            }
        })?;
        tracing::debug!(identifier, "migration handler loaded");
        loaded.insert(identifier.to_string(), Arc::clone(&handler));
        Ok(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{HandlerResult, MigrationContext, MigrationOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    #[async_trait]
    impl MigrationHandler for Noop {
        async fn up(&self, _ctx: &MigrationContext) -> HandlerResult {
            Ok(MigrationOutcome::success())
        }
    }

    fn registry(ids: &[(&str, bool)]) -> HandlerRegistry {
        let mut r = HandlerRegistry::new();
        for (id, reversible) in ids {
            r.register(*id, *reversible, || Noop);
        }
        r
    }

    #[test]
    fn merges_sources_ordered_by_timestamp() {
        let core = StaticSource::new("core", Scope::Core)
            .with("v1_1_0-300-late", Domain::Schema)
            .with("v1_0_0-100-early", Domain::Config);
        let ext = StaticSource::new("ext", Scope::Extension("nlu".into()))
            .with("v1_0_5-200-middle", Domain::Content);
        let catalog = MigrationCatalog::new(
            vec![Box::new(core), Box::new(ext)],
            registry(&[
                ("v1_1_0-300-late", true),
                ("v1_0_0-100-early", false),
                ("v1_0_5-200-middle", false),
            ]),
        );

        let units = catalog.discover().unwrap();
        let ids: Vec<&str> = units.iter().map(|u| u.identifier.as_str()).collect();
        assert_eq!(ids, ["v1_0_0-100-early", "v1_0_5-200-middle", "v1_1_0-300-late"]);
        assert_eq!(units[1].scope, Scope::Extension("nlu".into()));
        assert!(units[2].reversible);
        assert!(!units[0].reversible);
    }

    #[test]
    fn malformed_version_aborts_discovery() {
        let core = StaticSource::new("core", Scope::Core).with("vX_1_0-100-bad", Domain::Schema);
        let catalog = MigrationCatalog::new(
            vec![Box::new(core)],
            registry(&[("vX_1_0-100-bad", false)]),
        );
        assert!(matches!(
            catalog.discover(),
            Err(DiscoveryError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn unregistered_unit_aborts_discovery() {
        let core = StaticSource::new("core", Scope::Core).with("v1_0_0-100-orphan", Domain::Schema);
        let catalog = MigrationCatalog::new(vec![Box::new(core)], HandlerRegistry::new());
        assert!(matches!(
            catalog.discover(),
            Err(DiscoveryError::UnregisteredHandler { .. })
        ));
    }

    #[test]
    fn same_slot_in_one_domain_collides() {
        let core = StaticSource::new("core", Scope::Core)
            .with("v1_0_0-100-a", Domain::Schema)
            .with("v1_0_0-100-b", Domain::Schema);
        let catalog = MigrationCatalog::new(
            vec![Box::new(core)],
            registry(&[("v1_0_0-100-a", false), ("v1_0_0-100-b", false)]),
        );
        assert!(matches!(
            catalog.discover(),
            Err(DiscoveryError::OrderingCollision { .. })
        ));
    }

    #[test]
    fn same_slot_across_domains_is_allowed() {
        let core = StaticSource::new("core", Scope::Core)
            .with("v1_0_0-100-a", Domain::Schema)
            .with("v1_0_0-100-b", Domain::Config);
        let catalog = MigrationCatalog::new(
            vec![Box::new(core)],
            registry(&[("v1_0_0-100-a", false), ("v1_0_0-100-b", false)]),
        );
        assert_eq!(catalog.discover().unwrap().len(), 2);
    }

    #[test]
    fn identical_descriptor_twice_is_collapsed() {
        let a = StaticSource::new("a", Scope::Core).with("v1_0_0-100-x", Domain::Schema);
        let b = StaticSource::new("b", Scope::Core).with("v1_0_0-100-x", Domain::Schema);
        let catalog = MigrationCatalog::new(
            vec![Box::new(a), Box::new(b)],
            registry(&[("v1_0_0-100-x", false)]),
        );
        assert_eq!(catalog.discover().unwrap().len(), 1);
    }

    #[test]
    fn conflicting_duplicate_identifier_fails() {
        let a = StaticSource::new("a", Scope::Core).with("v1_0_0-100-x", Domain::Schema);
        let b = StaticSource::new("b", Scope::Extension("e".into()))
            .with("v1_0_0-100-x", Domain::Schema);
        let catalog = MigrationCatalog::new(
            vec![Box::new(a), Box::new(b)],
            registry(&[("v1_0_0-100-x", false)]),
        );
        assert!(matches!(
            catalog.discover(),
            Err(DiscoveryError::DuplicateIdentifier { .. })
        ));
    }

    #[test]
    fn handlers_are_instantiated_once() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);
        let mut r = HandlerRegistry::new();
        r.register("v1_0_0-100-x", false, || {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Noop
        });
        let catalog = MigrationCatalog::new(Vec::new(), r);

        let first = catalog.load_handler("v1_0_0-100-x").unwrap();
        let second = catalog.load_handler("v1_0_0-100-x").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
        assert!(catalog.load_handler("missing").is_err());
    }

    #[test]
    fn directory_source_scans_domain_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("schema")).unwrap();
        std::fs::create_dir_all(dir.path().join("content")).unwrap();
        std::fs::write(dir.path().join("schema/v1_0_0-100-a.toml"), "up = \"true\"").unwrap();
        std::fs::write(dir.path().join("schema/README.md"), "ignored").unwrap();
        std::fs::write(dir.path().join("content/v1_1_0-200-b.toml"), "up = \"true\"").unwrap();

        let entries = DirectorySource::core(dir.path()).entries().unwrap();
        let stems: Vec<(&str, Domain)> = entries
            .iter()
            .map(|e| (e.stem.as_str(), e.domain))
            .collect();
        assert_eq!(
            stems,
            [("v1_0_0-100-a", Domain::Schema), ("v1_1_0-200-b", Domain::Content)]
        );
        assert!(entries[0].path.as_ref().unwrap().ends_with("schema/v1_0_0-100-a.toml"));
    }

    #[test]
    fn missing_directory_contributes_nothing() {
        let source = DirectorySource::extension("gone", "/nonexistent/waypoint/migrations");
        assert!(source.entries().unwrap().is_empty());
    }
}

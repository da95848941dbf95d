//! Host configuration format for `waypoint.toml`.
//!
//! # Example
//!
//! ```toml
//! [app]
//! version = "1.2.0"
//! config_document = "var/config.json"
//! database = "var/waypoint.db"
//! cache_dirs = ["var/cache"]
//!
//! [migrations]
//! core = "migrations"
//!
//! [migrations.extensions]
//! search = "extensions/search/migrations"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use waypoint_core::{CatalogSource, DirectorySource, Version};

pub const DEFAULT_CONFIG_FILE: &str = "waypoint.toml";

/// Top-level `waypoint.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointConfig {
    pub app: AppSettings,
    #[serde(default)]
    pub migrations: MigrationSettings,
}

/// `[app]` section: the application being migrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Version of the build being deployed; the default target.
    pub version: String,
    /// JSON configuration document whose `version` field is the config marker.
    pub config_document: PathBuf,
    /// SQLite file holding the schema marker and the audit log.
    pub database: PathBuf,
    /// Directories emptied before a mutating run.
    #[serde(default)]
    pub cache_dirs: Vec<PathBuf>,
}

/// `[migrations]` section: where descriptors live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_core_dir")]
    pub core: PathBuf,
    /// Extension name to its migrations directory.
    #[serde(default)]
    pub extensions: BTreeMap<String, PathBuf>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        MigrationSettings {
            core: default_core_dir(),
            extensions: BTreeMap::new(),
        }
    }
}

fn default_core_dir() -> PathBuf {
    PathBuf::from("migrations")
}

impl WaypointConfig {
    /// Read, parse and validate `path`, resolving relative paths against
    /// its parent directory.
    pub fn load(path: &Path) -> Result<Self, String> {
        let toml_str = std::fs::read_to_string(path)
            .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
        let mut config: WaypointConfig = toml::from_str(&toml_str)
            .map_err(|e| format!("could not parse '{}': {}", path.display(), e))?;
        config.validate()?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.build_version()?;
        for name in self.migrations.extensions.keys() {
            if name.is_empty() {
                return Err("extension name cannot be empty".to_string());
            }
        }
        Ok(())
    }

    pub fn build_version(&self) -> Result<Version, String> {
        self.app
            .version
            .parse()
            .map_err(|e| format!("[app] version is invalid: {}", e))
    }

    /// Core source first, then extensions in name order.
    pub fn sources(&self) -> Vec<DirectorySource> {
        let mut sources = vec![DirectorySource::core(&self.migrations.core)];
        for (name, dir) in &self.migrations.extensions {
            sources.push(DirectorySource::extension(name, dir));
        }
        sources
    }

    pub fn boxed_sources(&self) -> Vec<Box<dyn CatalogSource>> {
        self.sources()
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn CatalogSource>)
            .collect()
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.app.config_document);
        resolve(&mut self.app.database);
        self.app.cache_dirs.iter_mut().for_each(resolve);
        resolve(&mut self.migrations.core);
        self.migrations.extensions.values_mut().for_each(resolve);
    }
}

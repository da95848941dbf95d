//! Migration units, their outcomes, and the handler contract.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use waypoint_storage::{ConfigStore, MetadataStore};

use crate::error::DiscoveryError;
use crate::version::Version;

/// The independently versioned facets of durable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Schema,
    Config,
    Content,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Schema, Domain::Config, Domain::Content];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Schema => "schema",
            Domain::Config => "config",
            Domain::Content => "content",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "schema" => Ok(Domain::Schema),
            "config" => Ok(Domain::Config),
            "content" => Ok(Domain::Content),
            other => Err(format!(
                "unknown migration domain '{}': expected schema, config, or content",
                other
            )),
        }
    }
}

/// Which subsystem owns the state a unit touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Core,
    /// Provided by the named extension.
    Extension(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Core => f.write_str("core"),
            Scope::Extension(name) => write!(f, "extension:{}", name),
        }
    }
}

/// Descriptor of one atomic, named state transition.
///
/// Handlers are not part of the descriptor; they live in the
/// [`crate::HandlerRegistry`] under the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationUnit {
    /// The descriptor stem exactly as written, e.g. `v1_2_0-1700000000-add-index`.
    pub identifier: String,
    pub version: Version,
    pub timestamp: u64,
    pub title: String,
    pub domain: Domain,
    pub scope: Scope,
    /// Whether a `down` handler is registered.
    pub reversible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl MigrationUnit {
    /// Parse a `<version>-<timestamp>-<title>` descriptor stem.
    ///
    /// The version segment is normalized (leading `v` dropped, `_` to `.`)
    /// before semver parsing. `reversible` starts out `false`; the catalog
    /// fills it in from the handler registry.
    pub fn parse(stem: &str, domain: Domain, scope: Scope) -> Result<Self, DiscoveryError> {
        let malformed = |reason: String| DiscoveryError::MalformedDescriptor {
            identifier: stem.to_string(),
            reason,
        };

        let mut parts = stem.splitn(3, '-');
        let (raw_version, raw_timestamp, title) = match (parts.next(), parts.next(), parts.next())
        {
            (Some(v), Some(t), Some(title)) if !title.trim().is_empty() => (v, t, title),
            _ => {
                return Err(malformed(
                    "expected <version>-<timestamp>-<title>".to_string(),
                ))
            }
        };

        let version = Version::from_descriptor(raw_version).map_err(|e| malformed(e.to_string()))?;
        let timestamp = raw_timestamp.parse::<u64>().map_err(|_| {
            malformed(format!(
                "timestamp '{}' is not a non-negative integer",
                raw_timestamp
            ))
        })?;

        Ok(MigrationUnit {
            identifier: stem.to_string(),
            version,
            timestamp,
            title: title.to_string(),
            domain,
            scope,
            reversible: false,
            path: None,
        })
    }
}

/// Result reported by a unit handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MigrationOutcome {
    pub fn success() -> Self {
        MigrationOutcome {
            success: true,
            message: None,
        }
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        MigrationOutcome {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        MigrationOutcome {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Error raised by a handler instead of returning an outcome.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<MigrationOutcome, HandlerError>;

/// Host services exposed to handlers by name.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, service: T) {
        self.services.insert(name.into(), Arc::new(service));
    }

    /// Look up a service by name and type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services.get(name).cloned()?.downcast::<T>().ok()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.services.keys()).finish()
    }
}

/// The bundle passed to every handler invocation.
///
/// Handlers may use the stores it carries; the orchestrator never looks
/// inside it.
#[derive(Clone)]
pub struct MigrationContext {
    pub config: Arc<dyn ConfigStore>,
    pub store: Arc<dyn MetadataStore>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub services: ServiceRegistry,
}

impl MigrationContext {
    pub fn new(config: Arc<dyn ConfigStore>, store: Arc<dyn MetadataStore>) -> Self {
        MigrationContext {
            config,
            store,
            metadata: BTreeMap::new(),
            services: ServiceRegistry::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_services(mut self, services: ServiceRegistry) -> Self {
        self.services = services;
        self
    }
}

impl fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationContext")
            .field("metadata", &self.metadata)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// Contract every migration unit implements.
///
/// `down` is only invoked for units registered as reversible.
#[async_trait]
pub trait MigrationHandler: Send + Sync {
    async fn up(&self, ctx: &MigrationContext) -> HandlerResult;

    async fn down(&self, _ctx: &MigrationContext) -> HandlerResult {
        Err("migration has no down handler".into())
    }
}

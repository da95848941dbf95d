//! Resolution of the current version markers and the run's target.

use std::sync::Arc;

use serde::Serialize;
use waypoint_storage::{ConfigStore, MetadataStore};

use crate::error::{ConfigError, TargetOrigin};
use crate::unit::Domain;
use crate::version::Version;

/// Name of the schema marker in the [`MetadataStore`].
pub const SCHEMA_MARKER: &str = "schema";

/// Caller-supplied sources for the target version, highest priority first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetOverrides {
    pub explicit: Option<String>,
    pub env_directive: Option<String>,
}

impl TargetOverrides {
    /// The highest-priority override, parsed. `None` when neither is set.
    ///
    /// Touches nothing, so hosts can reject a bad target before opening
    /// any collaborator.
    pub fn parse(&self) -> Result<Option<Version>, ConfigError> {
        let candidates = [
            (self.explicit.as_deref(), TargetOrigin::ExplicitOverride),
            (
                self.env_directive.as_deref(),
                TargetOrigin::EnvironmentDirective,
            ),
        ];
        for (raw, origin) in candidates {
            if let Some(raw) = raw {
                return raw
                    .parse()
                    .map(Some)
                    .map_err(|source| ConfigError::InvalidTarget { origin, source });
            }
        }
        Ok(None)
    }
}

/// Versions resolved once at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionState {
    pub schema_version: Version,
    pub config_version: Version,
    pub target_version: Version,
}

impl VersionState {
    /// The marker that bounds units of `domain`.
    pub fn current_for(&self, domain: Domain) -> &Version {
        match domain {
            Domain::Schema => &self.schema_version,
            Domain::Config | Domain::Content => &self.config_version,
        }
    }
}

pub struct VersionResolver {
    config: Arc<dyn ConfigStore>,
    metadata: Arc<dyn MetadataStore>,
    build_version: Version,
}

impl VersionResolver {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        metadata: Arc<dyn MetadataStore>,
        build_version: Version,
    ) -> Self {
        VersionResolver {
            config,
            metadata,
            build_version,
        }
    }

    pub fn build_version(&self) -> &Version {
        &self.build_version
    }

    /// Resolve markers and target. Reads the stores, never writes them.
    ///
    /// The target is validated before any store is touched.
    pub async fn resolve(&self, overrides: &TargetOverrides) -> Result<VersionState, ConfigError> {
        let target_version = self.resolve_target(overrides)?;

        let config_version = match self.config.config_version().await? {
            Some(raw) => parse_marker("config", &raw)?,
            None => {
                tracing::info!(
                    version = %self.build_version,
                    "configuration carries no version, assuming current build"
                );
                self.build_version.clone()
            }
        };

        let schema_version = match self.metadata.get_marker(SCHEMA_MARKER).await? {
            Some(record) => parse_marker(SCHEMA_MARKER, &record.version)?,
            None => config_version.clone(),
        };

        Ok(VersionState {
            schema_version,
            config_version,
            target_version,
        })
    }

    fn resolve_target(&self, overrides: &TargetOverrides) -> Result<Version, ConfigError> {
        Ok(overrides
            .parse()?
            .unwrap_or_else(|| self.build_version.clone()))
    }
}

fn parse_marker(marker: &str, raw: &str) -> Result<Version, ConfigError> {
    raw.parse().map_err(|source| ConfigError::CorruptMarker {
        marker: marker.to_string(),
        source,
    })
}

//! Command-backed migration units.
//!
//! Each descriptor file is a small TOML document:
//!
//! ```toml
//! description = "Add an index on users.email"
//! up = "sqlite3 \"$WAYPOINT_DATABASE\" < add_index.sql"
//! down = "sqlite3 \"$WAYPOINT_DATABASE\" < drop_index.sql"
//! ```
//!
//! `up` and `down` run through `sh -c` in the descriptor's directory. A unit
//! with a `down` command is reversible.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use waypoint_core::{
    CatalogSource, DirectorySource, Domain, HandlerRegistry, HandlerResult, MigrationContext,
    MigrationHandler, MigrationOutcome,
};

/// Contents of one descriptor file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDescriptor {
    #[serde(default)]
    pub description: String,
    pub up: String,
    #[serde(default)]
    pub down: Option<String>,
}

impl UnitDescriptor {
    pub fn read(path: &Path) -> Result<Self, String> {
        let toml_str = std::fs::read_to_string(path)
            .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
        let descriptor: UnitDescriptor = toml::from_str(&toml_str)
            .map_err(|e| format!("could not parse '{}': {}", path.display(), e))?;
        if descriptor.up.trim().is_empty() {
            return Err(format!("'{}': up command cannot be empty", path.display()));
        }
        Ok(descriptor)
    }
}

/// Paths exported to every command.
#[derive(Debug, Clone)]
pub struct ScriptEnv {
    pub database: PathBuf,
    pub config_document: PathBuf,
}

#[derive(Clone)]
pub struct CommandHandler {
    identifier: String,
    domain: Domain,
    workdir: PathBuf,
    descriptor: UnitDescriptor,
    env: ScriptEnv,
}

impl CommandHandler {
    async fn run(&self, direction: &str, command: &str) -> HandlerResult {
        tracing::debug!(
            identifier = %self.identifier,
            direction,
            command,
            "spawning migration command"
        );
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .env("WAYPOINT_UNIT", &self.identifier)
            .env("WAYPOINT_DIRECTION", direction)
            .env("WAYPOINT_DOMAIN", self.domain.as_str())
            .env("WAYPOINT_DATABASE", &self.env.database)
            .env("WAYPOINT_CONFIG_DOCUMENT", &self.env.config_document)
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(match stdout.lines().rev().find(|l| !l.trim().is_empty()) {
                Some(line) => MigrationOutcome::success_with(line.trim()),
                None => MigrationOutcome::success(),
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim() {
                "" => format!("command exited with {}", output.status),
                text => text.to_string(),
            };
            Ok(MigrationOutcome::failure(message))
        }
    }
}

#[async_trait]
impl MigrationHandler for CommandHandler {
    async fn up(&self, _ctx: &MigrationContext) -> HandlerResult {
        self.run("up", &self.descriptor.up).await
    }

    async fn down(&self, _ctx: &MigrationContext) -> HandlerResult {
        match &self.descriptor.down {
            Some(command) => self.run("down", command).await,
            None => Err(format!("migration '{}' has no down command", self.identifier).into()),
        }
    }
}

/// Read every descriptor the sources expose and register a command handler
/// for each. Descriptors are parsed here so a broken file fails the run
/// before anything executes.
pub fn build_registry(
    sources: &[DirectorySource],
    env: &ScriptEnv,
) -> Result<HandlerRegistry, String> {
    let mut registry = HandlerRegistry::new();
    for source in sources {
        let entries = source.entries().map_err(|e| e.to_string())?;
        for entry in entries {
            let Some(path) = entry.path else {
                continue;
            };
            let descriptor = UnitDescriptor::read(&path)?;
            let reversible = descriptor.down.is_some();
            let handler = CommandHandler {
                identifier: entry.stem.clone(),
                domain: entry.domain,
                workdir: path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
                descriptor,
                env: env.clone(),
            };
            registry.register(entry.stem, reversible, move || handler.clone());
        }
    }
    Ok(registry)
}

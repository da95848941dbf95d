//! The application's persisted configuration document.
//!
//! A JSON object whose top-level `"version"` string is the configuration
//! marker. Every other field belongs to the application and is written back
//! untouched.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use waypoint_storage::{ConfigStore, StorageError};

const VERSION_FIELD: &str = "version";

pub struct JsonConfigDocument {
    path: PathBuf,
}

impl JsonConfigDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonConfigDocument { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// The document as a JSON object; a missing file reads as `{}`.
    async fn read(&self) -> Result<serde_json::Map<String, serde_json::Value>, StorageError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Map::new());
            }
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "could not read '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };
        match serde_json::from_str(&raw)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(StorageError::Serialization(format!(
                "'{}' is not a JSON object",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl ConfigStore for JsonConfigDocument {
    async fn config_version(&self) -> Result<Option<String>, StorageError> {
        let doc = self.read().await?;
        match doc.get(VERSION_FIELD) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(v)) => Ok(Some(v.clone())),
            Some(other) => Err(StorageError::Serialization(format!(
                "'{}' field in '{}' must be a string, found {}",
                VERSION_FIELD,
                self.path.display(),
                other
            ))),
        }
    }

    async fn set_config_version(&self, version: &str) -> Result<(), StorageError> {
        let mut doc = self.read().await?;
        doc.insert(
            VERSION_FIELD.to_string(),
            serde_json::Value::String(version.to_string()),
        );
        let rendered = serde_json::to_string_pretty(&serde_json::Value::Object(doc))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        // Written beside the document, then renamed over it, so a crash
        // never leaves a half-written marker behind.
        let staging = self.staging_path();
        let write_error = |path: &Path, e: std::io::Error| {
            StorageError::Backend(format!("could not write '{}': {}", path.display(), e))
        };
        tokio::fs::write(&staging, rendered + "\n")
            .await
            .map_err(|e| write_error(&staging, e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| write_error(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use waypoint_storage::conformance::run_config_conformance;

    #[tokio::test]
    async fn passes_config_conformance() {
        let dir = Arc::new(tempfile::tempdir().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let report = run_config_conformance(|| {
            let dir = Arc::clone(&dir);
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { JsonConfigDocument::new(dir.path().join(format!("config-{}.json", n))) }
        })
        .await;
        assert_eq!(report.failed, 0, "{report}");
    }

    #[tokio::test]
    async fn write_replaces_document_without_leaving_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"version": "1.0.0"}"#).unwrap();
        // left over from an interrupted write
        std::fs::write(dir.path().join("config.json.tmp"), "{\"vers").unwrap();

        let doc = JsonConfigDocument::new(&path);
        assert_eq!(doc.config_version().await.unwrap().as_deref(), Some("1.0.0"));
        doc.set_config_version("1.1.0").await.unwrap();

        assert_eq!(doc.config_version().await.unwrap().as_deref(), Some("1.1.0"));
        assert!(!dir.path().join("config.json.tmp").exists());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, ["config.json"]);
    }

    #[tokio::test]
    async fn preserves_unrelated_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"version": "1.0.0", "site": {"title": "Docs"}}"#).unwrap();

        let doc = JsonConfigDocument::new(&path);
        assert_eq!(doc.config_version().await.unwrap().as_deref(), Some("1.0.0"));
        doc.set_config_version("1.1.0").await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["version"], "1.1.0");
        assert_eq!(written["site"]["title"], "Docs");
    }

    #[tokio::test]
    async fn non_object_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(JsonConfigDocument::new(&path).config_version().await.is_err());
    }
}

//! In-memory store backend.
//!
//! Implements all three store traits over shared, mutex-guarded state.
//! Clones share the same state, so a test can keep one handle for
//! inspection while the orchestrator owns another.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{ExecutionRecord, VersionMarkerRecord};
use crate::traits::{AuditStore, ConfigStore, MetadataStore};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    markers: BTreeMap<String, VersionMarkerRecord>,
    executions: Vec<ExecutionRecord>,
    config_version: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose configuration document already carries `version`.
    pub fn with_config_version(version: &str) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            inner.config_version = Some(version.to_string());
        }
        store
    }

    /// Number of audit records appended so far.
    pub fn execution_count(&self) -> usize {
        self.inner.lock().map(|i| i.executions.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_marker(&self, name: &str) -> Result<Option<VersionMarkerRecord>, StorageError> {
        Ok(self.lock()?.markers.get(name).cloned())
    }

    async fn set_marker(
        &self,
        name: &str,
        record: VersionMarkerRecord,
    ) -> Result<(), StorageError> {
        self.lock()?.markers.insert(name.to_string(), record);
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_execution(&self, record: ExecutionRecord) -> Result<(), StorageError> {
        self.lock()?.executions.push(record);
        Ok(())
    }

    async fn list_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StorageError> {
        let inner = self.lock()?;
        let newest_first = inner.executions.iter().rev().cloned();
        Ok(if limit == 0 {
            newest_first.collect()
        } else {
            newest_first.take(limit).collect()
        })
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn config_version(&self) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.config_version.clone())
    }

    async fn set_config_version(&self, version: &str) -> Result<(), StorageError> {
        self.lock()?.config_version = Some(version.to_string());
        Ok(())
    }
}

use std::future::Future;

use super::TestResult;
use crate::ConfigStore;

pub(super) async fn run_config_tests<C, F, Fut>(factory: &F) -> Vec<TestResult>
where
    C: ConfigStore,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "config",
        "unversioned_document_reads_none",
        unversioned_document_reads_none(factory).await,
    ));
    results.push(TestResult::from_result(
        "config",
        "set_version_is_readable",
        set_version_is_readable(factory).await,
    ));
    results.push(TestResult::from_result(
        "config",
        "set_version_replaces_previous",
        set_version_replaces_previous(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn unversioned_document_reads_none<C, F, Fut>(factory: &F) -> Result<(), String>
where
    C: ConfigStore,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    let c = factory().await;
    match c.config_version().await.map_err(|e| e.to_string())? {
        None => Ok(()),
        Some(v) => Err(format!("expected no version, got {}", v)),
    }
}

async fn set_version_is_readable<C, F, Fut>(factory: &F) -> Result<(), String>
where
    C: ConfigStore,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    let c = factory().await;
    c.set_config_version("1.4.0")
        .await
        .map_err(|e| e.to_string())?;
    match c.config_version().await.map_err(|e| e.to_string())? {
        Some(v) if v == "1.4.0" => Ok(()),
        other => Err(format!("expected Some(\"1.4.0\"), got {:?}", other)),
    }
}

async fn set_version_replaces_previous<C, F, Fut>(factory: &F) -> Result<(), String>
where
    C: ConfigStore,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    let c = factory().await;
    c.set_config_version("2.0.0")
        .await
        .map_err(|e| e.to_string())?;
    c.set_config_version("1.9.0")
        .await
        .map_err(|e| e.to_string())?;
    match c.config_version().await.map_err(|e| e.to_string())? {
        Some(v) if v == "1.9.0" => Ok(()),
        other => Err(format!("expected Some(\"1.9.0\"), got {:?}", other)),
    }
}

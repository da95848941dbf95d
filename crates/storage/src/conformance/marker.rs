use std::future::Future;

use super::{make_marker, TestResult};
use crate::MetadataStore;

pub(super) async fn run_marker_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MetadataStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "marker",
        "absent_marker_reads_none",
        absent_marker_reads_none(factory).await,
    ));
    results.push(TestResult::from_result(
        "marker",
        "set_marker_is_readable",
        set_marker_is_readable(factory).await,
    ));
    results.push(TestResult::from_result(
        "marker",
        "set_marker_replaces_previous",
        set_marker_replaces_previous(factory).await,
    ));
    results.push(TestResult::from_result(
        "marker",
        "marker_can_move_backwards",
        marker_can_move_backwards(factory).await,
    ));
    results.push(TestResult::from_result(
        "marker",
        "markers_are_independent_by_name",
        markers_are_independent_by_name(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A fresh store has no markers.
async fn absent_marker_reads_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MetadataStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_marker("schema").await.map_err(|e| e.to_string())? {
        None => Ok(()),
        Some(rec) => Err(format!("expected no marker, got {:?}", rec)),
    }
}

async fn set_marker_is_readable<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MetadataStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let marker = make_marker("1.2.0", "2025-01-01T00:00:00Z");
    s.set_marker("schema", marker.clone())
        .await
        .map_err(|e| e.to_string())?;

    let rec = s
        .get_marker("schema")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("marker missing after set")?;
    if rec != marker {
        return Err(format!("expected {:?}, got {:?}", marker, rec));
    }
    Ok(())
}

async fn set_marker_replaces_previous<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MetadataStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_marker("schema", make_marker("1.0.0", "2025-01-01T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    s.set_marker("schema", make_marker("1.1.0", "2025-01-02T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;

    let rec = s
        .get_marker("schema")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("marker missing after replace")?;
    if rec.version != "1.1.0" || rec.recorded_at != "2025-01-02T00:00:00Z" {
        return Err(format!("expected replaced marker 1.1.0, got {:?}", rec));
    }
    Ok(())
}

/// Downgrades record a lower version; stores must not enforce monotonicity.
async fn marker_can_move_backwards<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MetadataStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_marker("schema", make_marker("2.0.0", "2025-01-01T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    s.set_marker("schema", make_marker("1.0.0", "2025-01-02T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;

    let rec = s
        .get_marker("schema")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("marker missing")?;
    if rec.version != "1.0.0" {
        return Err(format!("expected 1.0.0 after downgrade, got {}", rec.version));
    }
    Ok(())
}

async fn markers_are_independent_by_name<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MetadataStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_marker("schema", make_marker("1.0.0", "2025-01-01T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    s.set_marker("other", make_marker("3.0.0", "2025-01-01T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;

    let schema = s
        .get_marker("schema")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("schema marker missing")?;
    if schema.version != "1.0.0" {
        return Err(format!(
            "writing 'other' changed 'schema' to {}",
            schema.version
        ));
    }
    Ok(())
}

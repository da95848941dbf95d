use std::future::Future;

use super::{make_execution, TestResult};
use crate::AuditStore;

pub(super) async fn run_audit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AuditStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "audit",
        "list_executions_empty",
        list_executions_empty(factory).await,
    ));
    results.push(TestResult::from_result(
        "audit",
        "inserted_execution_round_trips",
        inserted_execution_round_trips(factory).await,
    ));
    results.push(TestResult::from_result(
        "audit",
        "list_is_newest_first",
        list_is_newest_first(factory).await,
    ));
    results.push(TestResult::from_result(
        "audit",
        "limit_truncates_listing",
        limit_truncates_listing(factory).await,
    ));
    results.push(TestResult::from_result(
        "audit",
        "multiline_details_preserved",
        multiline_details_preserved(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn list_executions_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let list = s.list_executions(0).await.map_err(|e| e.to_string())?;
    if !list.is_empty() {
        return Err(format!("expected no executions, got {}", list.len()));
    }
    Ok(())
}

async fn inserted_execution_round_trips<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let record = make_execution("1.0.0", "1.2.0", "2025-01-01T00:00:00Z");
    s.insert_execution(record.clone())
        .await
        .map_err(|e| e.to_string())?;

    let list = s.list_executions(0).await.map_err(|e| e.to_string())?;
    match list.as_slice() {
        [only] if *only == record => Ok(()),
        other => Err(format!("expected exactly the inserted record, got {:?}", other)),
    }
}

/// Records inserted later come first, regardless of `created_at` text.
async fn list_is_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for (i, target) in ["1.1.0", "1.2.0", "1.3.0"].iter().enumerate() {
        let created_at = format!("2025-01-0{}T00:00:00Z", i + 1);
        s.insert_execution(make_execution("1.0.0", target, &created_at))
            .await
            .map_err(|e| e.to_string())?;
    }

    let list = s.list_executions(0).await.map_err(|e| e.to_string())?;
    let targets: Vec<&str> = list.iter().map(|r| r.target_version.as_str()).collect();
    if targets != ["1.3.0", "1.2.0", "1.1.0"] {
        return Err(format!("expected newest first, got {:?}", targets));
    }
    Ok(())
}

async fn limit_truncates_listing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for target in ["1.1.0", "1.2.0", "1.3.0"] {
        s.insert_execution(make_execution("1.0.0", target, "2025-01-01T00:00:00Z"))
            .await
            .map_err(|e| e.to_string())?;
    }

    let list = s.list_executions(2).await.map_err(|e| e.to_string())?;
    if list.len() != 2 {
        return Err(format!("expected 2 records with limit 2, got {}", list.len()));
    }
    if list[0].target_version != "1.3.0" {
        return Err(format!(
            "expected newest record first, got {}",
            list[0].target_version
        ));
    }
    Ok(())
}

async fn multiline_details_preserved<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AuditStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut record = make_execution("1.0.0", "1.1.0", "2025-01-01T00:00:00Z");
    record.details = "[schema] a: success\n[config] b: failure (boom)\n".to_string();
    s.insert_execution(record.clone())
        .await
        .map_err(|e| e.to_string())?;

    let list = s.list_executions(1).await.map_err(|e| e.to_string())?;
    let got = list.first().ok_or("record missing")?;
    if got.details != record.details {
        return Err(format!("details changed: {:?}", got.details));
    }
    Ok(())
}

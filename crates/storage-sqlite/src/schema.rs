/// Bootstrap schema for the store's own tables.
///
/// Applied once when `version_markers` is missing. The tables are the
/// orchestrator's bookkeeping, so they are never subject to the migrations
/// the orchestrator runs.
pub const BOOTSTRAP: &str = r#"
BEGIN;

CREATE TABLE version_markers (
  name            TEXT PRIMARY KEY,
  version         TEXT NOT NULL,
  recorded_at     TEXT NOT NULL
);

CREATE TABLE migration_runs (
  run_id          INTEGER PRIMARY KEY AUTOINCREMENT,
  initial_version TEXT NOT NULL,
  target_version  TEXT NOT NULL,
  details         TEXT NOT NULL,
  created_at      TEXT NOT NULL
);

COMMIT;
"#;

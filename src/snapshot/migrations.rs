pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS decision_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    campaign_name TEXT NOT NULL,
    device TEXT NOT NULL,
    lookback TEXT NOT NULL,
    old_value REAL,
    new_value REAL,
    target REAL NOT NULL,
    conversions REAL NOT NULL,
    reason TEXT NOT NULL,
    applied INTEGER NOT NULL,
    captured_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decision_campaign_captured
    ON decision_history(campaign_id, captured_at DESC);
CREATE INDEX IF NOT EXISTS idx_decision_run
    ON decision_history(run_id);
"#;

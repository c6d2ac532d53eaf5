/// Schema version recorded in `PRAGMA user_version`.
pub const DB_VERSION: u32 = 1;

pub const SCHEMA: &str = r#"
-- Paper records (JSON document per paper)
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_records_last_modified
    ON records(last_modified);

-- Mutations made while offline, replayed by the sync coordinator
CREATE TABLE IF NOT EXISTS pending_ops (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    data TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

-- Background-sync queue drained by the asset cache worker
CREATE TABLE IF NOT EXISTS offline_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    data TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
"#;

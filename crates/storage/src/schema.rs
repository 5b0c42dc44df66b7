use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub const COMPLETED_REQUIRES_VERSION_TRIGGER: &str = "trg_reports_completed_requires_version";
pub const ORPHANED_REPORTS_INDEX: &str = "idx_reports_orphaned";

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS competitors (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_projects_updated ON projects (updated_at DESC, id);

CREATE TABLE IF NOT EXISTS project_competitors (
    project_id BLOB NOT NULL REFERENCES projects (id),
    competitor_id BLOB NOT NULL REFERENCES competitors (id),
    PRIMARY KEY (project_id, competitor_id)
);
CREATE INDEX IF NOT EXISTS idx_project_competitors_competitor ON project_competitors (competitor_id);

CREATE TABLE IF NOT EXISTS reports (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    competitor_id BLOB REFERENCES competitors (id),
    project_id BLOB REFERENCES projects (id),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reports_status ON reports (status);

CREATE TABLE IF NOT EXISTS report_versions (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    report_id BLOB NOT NULL REFERENCES reports (id),
    version INTEGER NOT NULL CHECK (version >= 1),
    content BLOB,
    created_at INTEGER NOT NULL,
    UNIQUE (report_id, version)
);

CREATE TABLE IF NOT EXISTS report_schedules (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    report_id BLOB NOT NULL REFERENCES reports (id),
    frequency TEXT NOT NULL,
    next_run_at INTEGER,
    enabled INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_report_schedules_report ON report_schedules (report_id);

CREATE TABLE IF NOT EXISTS report_quality (
    report_id BLOB PRIMARY KEY REFERENCES reports (id),
    completeness_score INTEGER NOT NULL CHECK (completeness_score BETWEEN 0 AND 100),
    freshness TEXT NOT NULL,
    snapshot_count INTEGER NOT NULL,
    captured_at INTEGER NOT NULL
);
";

pub(crate) const INTEGRITY_CONSTRAINTS_SQL: &str = "
CREATE TRIGGER IF NOT EXISTS trg_reports_completed_requires_version
BEFORE UPDATE OF status ON reports
WHEN NEW.status = 'COMPLETED'
    AND (SELECT COUNT(*) FROM report_versions WHERE report_id = NEW.id) = 0
BEGIN
    SELECT RAISE(ABORT, 'report cannot be COMPLETED without a version');
END;

CREATE INDEX IF NOT EXISTS idx_reports_orphaned ON reports (created_at) WHERE project_id IS NULL;
";

pub(crate) const DROP_INTEGRITY_CONSTRAINTS_SQL: &str = "
DROP TRIGGER IF EXISTS trg_reports_completed_requires_version;
DROP INDEX IF EXISTS idx_reports_orphaned;
";

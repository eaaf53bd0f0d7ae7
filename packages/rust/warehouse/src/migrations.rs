//! SQL migration definitions for the warehouse database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as a batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: publications, harvest_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Harvested publication records, keyed by title for upsert purposes.
-- Deliberately no UNIQUE constraint: duplicates may accumulate and are
-- collapsed by the post-merge dedupe pass.
CREATE TABLE IF NOT EXISTS publications (
    title        TEXT NOT NULL,
    summary      TEXT NOT NULL,
    document_ref TEXT,
    image_ref    TEXT
);

CREATE INDEX IF NOT EXISTS idx_publications_title ON publications(title);

-- Load history, one row per completed warehouse load
CREATE TABLE IF NOT EXISTS harvest_runs (
    id           TEXT PRIMARY KEY,
    loaded_at    TEXT NOT NULL,
    record_count INTEGER NOT NULL,
    stats_json   TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}

//! SQLite schema for published versions.
//!
//! Tables:
//! - `mods`: Catalog entries the pipeline publishes into
//! - `versions`: One row per version, unique per (mod, version string)
//! - `version_dependencies`: Required and optional dependencies
//! - `version_targets`: Per-target artifacts
//! - `scan_jobs`: Durable virus scan queue

/// DDL for the record store and job queue.
///
/// Schema version: 1
pub const RECORD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS mods (
    id                TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    mod_reference     TEXT NOT NULL UNIQUE,
    last_published_at TEXT
);

CREATE TABLE IF NOT EXISTS versions (
    id                TEXT PRIMARY KEY,
    mod_id            TEXT NOT NULL REFERENCES mods(id),
    version           TEXT NOT NULL,
    sml_version       TEXT NOT NULL,
    changelog         TEXT NOT NULL,
    stability         TEXT NOT NULL,
    mod_reference     TEXT NOT NULL,
    hash              TEXT NOT NULL,
    size              INTEGER NOT NULL,
    version_major     INTEGER NOT NULL,
    version_minor     INTEGER NOT NULL,
    version_patch     INTEGER NOT NULL,
    approved          INTEGER NOT NULL DEFAULT 0,
    storage_key       TEXT,
    metadata          TEXT,
    created_at        TEXT NOT NULL,
    UNIQUE(mod_id, version)
);

CREATE TABLE IF NOT EXISTS version_dependencies (
    version_id        TEXT NOT NULL REFERENCES versions(id),
    mod_id            TEXT NOT NULL,
    condition         TEXT NOT NULL,
    optional          INTEGER NOT NULL,
    PRIMARY KEY (version_id, mod_id, optional)
);

CREATE TABLE IF NOT EXISTS version_targets (
    version_id        TEXT NOT NULL REFERENCES versions(id),
    target_name       TEXT NOT NULL,
    storage_key       TEXT,
    hash              TEXT,
    size              INTEGER,
    PRIMARY KEY (version_id, target_name)
);

CREATE TABLE IF NOT EXISTS scan_jobs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    mod_id            TEXT NOT NULL,
    version_id        TEXT NOT NULL,
    notify_on_result  INTEGER NOT NULL,
    status            TEXT NOT NULL DEFAULT 'pending',
    submitted_at      TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at       TEXT
);

CREATE INDEX IF NOT EXISTS idx_versions_mod_id
    ON versions(mod_id);
CREATE INDEX IF NOT EXISTS idx_scan_jobs_status
    ON scan_jobs(status, id);
"#;

//! SqliteRecordStore: SQLite-backed version, dependency and target rows.
//!
//! Every call runs synchronously on one shared connection; no guard is held
//! across an await point.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use modvault_core::{
    Mod, RecordError, RecordResult, RecordStore, Stability, Version, VersionDependency,
    VersionTarget,
};

use crate::job_queue::SqliteJobQueue;
use crate::schema::RECORD_SCHEMA;

/// Map a driver error, surfacing constraint violations as conflicts.
pub(crate) fn db_error(e: rusqlite::Error) -> RecordError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            RecordError::Conflict {
                message: e.to_string(),
            }
        }
        _ => RecordError::Database(e.to_string()),
    }
}

fn parse_time(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const VERSION_COLUMNS: &str = "id, mod_id, version, sml_version, changelog, stability, \
     mod_reference, hash, size, version_major, version_minor, version_patch, approved, \
     storage_key, metadata, created_at";

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Version> {
    let stability: String = row.get(5)?;
    let stability = Stability::parse(&stability).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("unknown stability '{}'", stability).into(),
        )
    })?;

    Ok(Version {
        id: row.get(0)?,
        mod_id: row.get(1)?,
        version: row.get(2)?,
        sml_version: row.get(3)?,
        changelog: row.get(4)?,
        stability,
        mod_reference: row.get(6)?,
        hash: row.get(7)?,
        size: row.get::<_, i64>(8)? as u64,
        version_major: row.get::<_, i64>(9)? as u64,
        version_minor: row.get::<_, i64>(10)? as u64,
        version_patch: row.get::<_, i64>(11)? as u64,
        approved: row.get::<_, i64>(12)? != 0,
        key: row.get(13)?,
        metadata: row.get(14)?,
        created_at: parse_time(15, row.get(15)?)?,
    })
}

fn mod_from_row(row: &Row<'_>) -> rusqlite::Result<Mod> {
    let last_published_at: Option<String> = row.get(3)?;
    Ok(Mod {
        id: row.get(0)?,
        name: row.get(1)?,
        mod_reference: row.get(2)?,
        last_published_at: last_published_at.map(|t| parse_time(3, t)).transpose()?,
    })
}

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open a file-backed store.
    pub fn open(path: &Path) -> RecordResult<Self> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn memory() -> RecordResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::from_connection(conn)
    }

    /// Create store from an existing connection.
    pub fn from_connection(conn: Connection) -> RecordResult<Self> {
        Self::init_connection(&conn).map_err(db_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        // WAL mode for file-backed DBs (no-op for in-memory)
        let _ = conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()));
        conn.execute_batch(RECORD_SCHEMA)
    }

    /// A job queue sharing this store's connection.
    pub fn job_queue(&self) -> SqliteJobQueue {
        SqliteJobQueue::new(Arc::clone(&self.conn))
    }

    pub(crate) fn lock(conn: &Mutex<Connection>) -> RecordResult<MutexGuard<'_, Connection>> {
        conn.lock()
            .map_err(|_| RecordError::Database("connection mutex poisoned".to_string()))
    }

    fn conn(&self) -> RecordResult<MutexGuard<'_, Connection>> {
        Self::lock(&self.conn)
    }

    /// Insert or update a catalog entry.
    pub fn insert_mod(&self, owner: &Mod) -> RecordResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO mods (id, name, mod_reference, last_published_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                mod_reference = excluded.mod_reference,
                last_published_at = excluded.last_published_at
            "#,
            params![
                owner.id,
                owner.name,
                owner.mod_reference,
                owner.last_published_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(db_error)?;
        Ok(())
    }

    pub fn find_mod(&self, id: &str) -> RecordResult<Option<Mod>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, mod_reference, last_published_at FROM mods WHERE id = ?1",
            [id],
            mod_from_row,
        )
        .optional()
        .map_err(db_error)
    }

    pub fn get_version(&self, id: &str) -> RecordResult<Option<Version>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM versions WHERE id = ?1", VERSION_COLUMNS),
            [id],
            version_from_row,
        )
        .optional()
        .map_err(db_error)
    }

    /// Look up a version by its (mod, version string) identity.
    pub fn find_version(&self, mod_id: &str, version: &str) -> RecordResult<Option<Version>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM versions WHERE mod_id = ?1 AND version = ?2",
                VERSION_COLUMNS
            ),
            [mod_id, version],
            version_from_row,
        )
        .optional()
        .map_err(db_error)
    }

    /// All versions of a mod, oldest first.
    pub fn versions_for(&self, mod_id: &str) -> RecordResult<Vec<Version>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM versions WHERE mod_id = ?1 ORDER BY created_at, id",
                VERSION_COLUMNS
            ))
            .map_err(db_error)?;
        let rows = stmt
            .query_map([mod_id], version_from_row)
            .map_err(db_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_error)
    }

    /// Dependencies of a version: required first, then by mod.
    pub fn dependencies_for(&self, version_id: &str) -> RecordResult<Vec<VersionDependency>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT version_id, mod_id, condition, optional
                FROM version_dependencies WHERE version_id = ?1
                ORDER BY optional, mod_id
                "#,
            )
            .map_err(db_error)?;
        let rows = stmt
            .query_map([version_id], |row| {
                Ok(VersionDependency {
                    version_id: row.get(0)?,
                    mod_id: row.get(1)?,
                    condition: row.get(2)?,
                    optional: row.get::<_, i64>(3)? != 0,
                })
            })
            .map_err(db_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_error)
    }

    pub fn targets_for(&self, version_id: &str) -> RecordResult<Vec<VersionTarget>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT version_id, target_name, storage_key, hash, size
                FROM version_targets WHERE version_id = ?1
                ORDER BY target_name
                "#,
            )
            .map_err(db_error)?;
        let rows = stmt
            .query_map([version_id], |row| {
                Ok(VersionTarget {
                    version_id: row.get(0)?,
                    target_name: row.get(1)?,
                    key: row.get(2)?,
                    hash: row.get(3)?,
                    size: row.get::<_, Option<i64>>(4)?.map(|s| s as u64),
                })
            })
            .map_err(db_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_error)
    }

    /// Row counts of (versions, dependencies, targets).
    pub fn counts(&self) -> RecordResult<(u64, u64, u64)> {
        let conn = self.conn()?;
        let count = |table: &str| -> RecordResult<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(db_error)
        };
        Ok((
            count("versions")?,
            count("version_dependencies")?,
            count("version_targets")?,
        ))
    }

    fn delete_version_rows(conn: &Connection, version_id: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "DELETE FROM version_dependencies WHERE version_id = ?1",
            [version_id],
        )?;
        conn.execute(
            "DELETE FROM version_targets WHERE version_id = ?1",
            [version_id],
        )?;
        conn.execute("DELETE FROM scan_jobs WHERE version_id = ?1", [version_id])?;
        conn.execute("DELETE FROM versions WHERE id = ?1", [version_id])
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_mod_by_id(&self, id: &str) -> RecordResult<Option<Mod>> {
        self.find_mod(id)
    }

    async fn save_mod(&self, owner: &Mod) -> RecordResult<()> {
        self.insert_mod(owner)
    }

    async fn create_version(&self, version: &Version) -> RecordResult<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO versions ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                VERSION_COLUMNS
            ),
            params![
                version.id,
                version.mod_id,
                version.version,
                version.sml_version,
                version.changelog,
                version.stability.as_str(),
                version.mod_reference,
                version.hash,
                version.size as i64,
                version.version_major as i64,
                version.version_minor as i64,
                version.version_patch as i64,
                version.approved as i32,
                version.key,
                version.metadata,
                version.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_error)?;
        debug!(version_id = %version.id, version = %version.version, "version row created");
        Ok(())
    }

    async fn save_version(&self, version: &Version) -> RecordResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                r#"
                UPDATE versions SET
                    sml_version = ?2, changelog = ?3, stability = ?4, mod_reference = ?5,
                    hash = ?6, size = ?7, version_major = ?8, version_minor = ?9,
                    version_patch = ?10, approved = ?11, storage_key = ?12, metadata = ?13
                WHERE id = ?1
                "#,
                params![
                    version.id,
                    version.sml_version,
                    version.changelog,
                    version.stability.as_str(),
                    version.mod_reference,
                    version.hash,
                    version.size as i64,
                    version.version_major as i64,
                    version.version_minor as i64,
                    version.version_patch as i64,
                    version.approved as i32,
                    version.key,
                    version.metadata,
                ],
            )
            .map_err(db_error)?;

        if updated == 0 {
            return Err(RecordError::NotFound {
                entity: "version",
                id: version.id.clone(),
            });
        }
        Ok(())
    }

    async fn save_dependency(&self, dependency: &VersionDependency) -> RecordResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO version_dependencies (version_id, mod_id, condition, optional)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(version_id, mod_id, optional) DO UPDATE SET
                condition = excluded.condition
            "#,
            params![
                dependency.version_id,
                dependency.mod_id,
                dependency.condition,
                dependency.optional as i32,
            ],
        )
        .map_err(db_error)?;
        Ok(())
    }

    async fn save_target(&self, target: &VersionTarget) -> RecordResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO version_targets (version_id, target_name, storage_key, hash, size)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(version_id, target_name) DO UPDATE SET
                storage_key = excluded.storage_key,
                hash = excluded.hash,
                size = excluded.size
            "#,
            params![
                target.version_id,
                target.target_name,
                target.key,
                target.hash,
                target.size.map(|s| s as i64),
            ],
        )
        .map_err(db_error)?;
        Ok(())
    }

    async fn force_delete_dependency(&self, dependency: &VersionDependency) -> RecordResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM version_dependencies WHERE version_id = ?1 AND mod_id = ?2 AND optional = ?3",
            params![
                dependency.version_id,
                dependency.mod_id,
                dependency.optional as i32
            ],
        )
        .map_err(db_error)?;
        Ok(())
    }

    async fn force_delete_target(&self, target: &VersionTarget) -> RecordResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM version_targets WHERE version_id = ?1 AND target_name = ?2",
            params![target.version_id, target.target_name],
        )
        .map_err(db_error)?;
        Ok(())
    }

    async fn force_delete_version(&self, version: &Version) -> RecordResult<()> {
        let conn = self.conn()?;

        conn.execute("BEGIN IMMEDIATE", []).map_err(db_error)?;
        let result = Self::delete_version_rows(&conn, &version.id);

        match result {
            Ok(deleted) => {
                conn.execute("COMMIT", []).map_err(db_error)?;
                debug!(version_id = %version.id, deleted, "version force-deleted");
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(db_error(e))
            }
        }
    }
}

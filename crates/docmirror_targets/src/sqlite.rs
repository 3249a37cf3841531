//! SQLite-backed sync target.
//!
//! One table per target:
//!
//! ```text
//! doc_id        TEXT PRIMARY KEY   -- 32 hex chars
//! sequence      INTEGER NOT NULL
//! sequence_time INTEGER NOT NULL
//! fields_json   TEXT NOT NULL      -- projected fields as a JSON object
//! ```

use crate::memory::TargetEntry;
use docmirror_core::{CoreError, CoreResult, DocumentId, FieldSet, Fields, SyncTarget, Version};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Longest accepted table name.
const MAX_TABLE_NAME: usize = 64;

/// SQLite journal mode for the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    /// Rollback journal, deleted after each transaction.
    Delete,
    /// Write-ahead log; readers never block the writer.
    #[default]
    Wal,
    /// Journal kept in memory.
    Memory,
}

impl JournalMode {
    fn as_str(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Wal => "WAL",
            JournalMode::Memory => "MEMORY",
        }
    }
}

/// Configuration for a [`SqliteTarget`].
#[derive(Debug, Clone)]
pub struct SqliteTargetConfig {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// Table holding the projections.
    pub table: String,
    /// Fields to materialize.
    pub projection: FieldSet,
    /// Journal mode set when opening.
    pub journal_mode: JournalMode,
    /// Identity used to key sync state. Defaults to the table name.
    pub target_id: Option<String>,
}

impl SqliteTargetConfig {
    /// Creates a configuration for a table in a database file.
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            table: table.into(),
            projection: FieldSet::All,
            journal_mode: JournalMode::default(),
            target_id: None,
        }
    }

    /// Creates a configuration for an in-memory database.
    pub fn in_memory(table: impl Into<String>) -> Self {
        Self {
            path: None,
            table: table.into(),
            projection: FieldSet::All,
            journal_mode: JournalMode::Memory,
            target_id: None,
        }
    }

    /// Sets the projected fields.
    pub fn with_projection(mut self, projection: FieldSet) -> Self {
        self.projection = projection;
        self
    }

    /// Sets the journal mode.
    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Sets the target identity.
    pub fn with_target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Checks that the table name is a plain SQL identifier.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidOperation` for an empty, overlong or
    /// non-identifier table name.
    pub fn validate(&self) -> CoreResult<()> {
        let mut chars = self.table.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_start || !valid_rest || self.table.len() > MAX_TABLE_NAME {
            return Err(CoreError::invalid_operation(format!(
                "invalid table name {:?}",
                self.table
            )));
        }
        Ok(())
    }
}

/// Materializes projections as JSON rows in a SQLite table.
///
/// The target is transactional: the engine wraps each pass in one
/// `BEGIN IMMEDIATE` / `COMMIT`, so other connections see either the
/// state before the pass or after it.
#[derive(Debug)]
pub struct SqliteTarget {
    target_id: String,
    table: String,
    projection: FieldSet,
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteTarget {
    /// Opens (and if needed creates) the database and table.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or SQLite fails.
    pub fn open(config: SqliteTargetConfig) -> CoreResult<Self> {
        config.validate()?;

        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path).map_err(sql_error("open"))?
            }
            None => Connection::open_in_memory().map_err(sql_error("open"))?,
        };

        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};",
            config.journal_mode.as_str()
        ))
        .map_err(sql_error("pragma"))?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                doc_id TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL,
                sequence_time INTEGER NOT NULL,
                fields_json TEXT NOT NULL
             );",
            config.table
        ))
        .map_err(sql_error("schema"))?;

        debug!(table = %config.table, path = ?config.path, "sqlite target opened");
        Ok(Self {
            target_id: config.target_id.unwrap_or_else(|| config.table.clone()),
            table: config.table,
            projection: config.projection,
            path: config.path,
            conn: Mutex::new(conn),
        })
    }

    /// Returns the database path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of rows.
    pub fn count(&self) -> CoreResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(sql_error("count"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Reads one row back.
    pub fn get(&self, id: DocumentId) -> CoreResult<Option<TargetEntry>> {
        let conn = self.conn.lock();
        let row: Option<(i64, i64, String)> = conn
            .query_row(
                &format!(
                    "SELECT sequence, sequence_time, fields_json FROM {} WHERE doc_id = ?1",
                    self.table
                ),
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(sql_error("get"))?;

        let Some((sequence, sequence_time, json)) = row else {
            return Ok(None);
        };
        let fields: Fields = serde_json::from_str(&json)
            .map_err(|e| CoreError::codec(format!("row {id}: {e}")))?;
        Ok(Some(TargetEntry {
            fields,
            version: version_from_row(sequence, sequence_time)?,
        }))
    }
}

impl SyncTarget for SqliteTarget {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    fn existing_ids(&self) -> CoreResult<HashSet<DocumentId>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT doc_id FROM {}", self.table))
            .map_err(sql_error("existing ids"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql_error("existing ids"))?;

        let mut ids = HashSet::new();
        for raw in rows {
            let raw = raw.map_err(sql_error("existing ids"))?;
            let id = raw
                .parse::<DocumentId>()
                .map_err(|e| CoreError::codec(format!("bad doc_id {raw:?}: {e}")))?;
            ids.insert(id);
        }
        Ok(ids)
    }

    fn stored_version(&self, id: DocumentId) -> CoreResult<Option<Version>> {
        let conn = self.conn.lock();
        let row: Option<(i64, i64)> = conn
            .query_row(
                &format!(
                    "SELECT sequence, sequence_time FROM {} WHERE doc_id = ?1",
                    self.table
                ),
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_error("stored version"))?;
        row.map(|(sequence, time)| version_from_row(sequence, time))
            .transpose()
    }

    fn projection_fields(&self) -> FieldSet {
        self.projection.clone()
    }

    fn upsert(&self, id: DocumentId, fields: &Fields, version: Version) -> CoreResult<()> {
        let json = serde_json::to_string(&self.projection.project(fields))
            .map_err(|e| CoreError::codec(e.to_string()))?;
        let sequence_time = i64::try_from(version.sequence_time).map_err(|_| {
            CoreError::target(format!("sequence time {} out of range", version.sequence_time))
        })?;

        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO {} (doc_id, sequence, sequence_time, fields_json)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(doc_id) DO UPDATE SET
                    sequence = excluded.sequence,
                    sequence_time = excluded.sequence_time,
                    fields_json = excluded.fields_json",
                self.table
            ),
            (id.to_string(), i64::from(version.sequence), sequence_time, json),
        )
        .map_err(sql_error("upsert"))?;
        Ok(())
    }

    fn remove(&self, id: DocumentId) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("DELETE FROM {} WHERE doc_id = ?1", self.table),
            [id.to_string()],
        )
        .map_err(sql_error("remove"))?;
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        true
    }

    fn begin_batch(&self) -> CoreResult<()> {
        self.conn
            .lock()
            .execute_batch("BEGIN IMMEDIATE;")
            .map_err(sql_error("begin"))
    }

    fn commit_batch(&self) -> CoreResult<()> {
        self.conn
            .lock()
            .execute_batch("COMMIT;")
            .map_err(sql_error("commit"))
    }

    fn rollback_batch(&self) -> CoreResult<()> {
        let conn = self.conn.lock();
        if conn.is_autocommit() {
            warn!(table = %self.table, "rollback requested without an open batch");
            return Ok(());
        }
        conn.execute_batch("ROLLBACK;").map_err(sql_error("rollback"))
    }
}

fn version_from_row(sequence: i64, sequence_time: i64) -> CoreResult<Version> {
    let sequence = u32::try_from(sequence)
        .map_err(|_| CoreError::codec(format!("sequence {sequence} out of range")))?;
    let sequence_time = u64::try_from(sequence_time)
        .map_err(|_| CoreError::codec(format!("sequence time {sequence_time} out of range")))?;
    Ok(Version::new(sequence, sequence_time))
}

fn sql_error(context: &'static str) -> impl Fn(rusqlite::Error) -> CoreError {
    move |e| CoreError::target(format!("sqlite {context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmirror_core::Value;
    use tempfile::TempDir;

    fn fields(last: &str) -> Fields {
        [
            ("Form".to_string(), Value::text("Person")),
            ("Lastname".to_string(), Value::text(last)),
        ]
        .into()
    }

    fn memory_target() -> SqliteTarget {
        SqliteTarget::open(
            SqliteTargetConfig::in_memory("people").with_projection(FieldSet::named(["Lastname"])),
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_table_names() {
        for bad in ["", "1abc", "people; DROP TABLE x", "a-b"] {
            assert!(SqliteTargetConfig::in_memory(bad).validate().is_err(), "{bad}");
        }
        assert!(SqliteTargetConfig::in_memory("people_2").validate().is_ok());
    }

    #[test]
    fn upsert_get_remove() {
        let target = memory_target();
        let id = DocumentId::new();
        target
            .upsert(id, &fields("Lovelace"), Version::new(1, 100))
            .unwrap();
        target
            .upsert(id, &fields("Byron"), Version::new(2, 200))
            .unwrap();

        let entry = target.get(id).unwrap().unwrap();
        assert_eq!(entry.version, Version::new(2, 200));
        assert_eq!(entry.fields.len(), 1);
        assert_eq!(entry.fields["Lastname"], Value::text("Byron"));
        assert_eq!(target.stored_version(id).unwrap(), Some(Version::new(2, 200)));
        assert_eq!(target.existing_ids().unwrap(), [id].into_iter().collect());

        target.remove(id).unwrap();
        target.remove(id).unwrap();
        assert_eq!(target.count().unwrap(), 0);
        assert!(target.stored_version(id).unwrap().is_none());
    }

    #[test]
    fn rollback_discards_batch() {
        let target = memory_target();
        let kept = DocumentId::new();
        target.upsert(kept, &fields("A"), Version::new(1, 1)).unwrap();

        target.begin_batch().unwrap();
        target
            .upsert(DocumentId::new(), &fields("B"), Version::new(1, 2))
            .unwrap();
        target.remove(kept).unwrap();
        target.rollback_batch().unwrap();

        assert_eq!(target.existing_ids().unwrap(), [kept].into_iter().collect());
        // A second rollback without an open batch is harmless.
        target.rollback_batch().unwrap();
    }

    #[test]
    fn commit_persists_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.db");
        let id = DocumentId::new();
        {
            let target = SqliteTarget::open(SqliteTargetConfig::new(&path, "people")).unwrap();
            target.begin_batch().unwrap();
            target.upsert(id, &fields("A"), Version::new(1, 1)).unwrap();
            target.commit_batch().unwrap();
        }

        let reopened = SqliteTarget::open(
            SqliteTargetConfig::new(&path, "people").with_target_id("people@disk"),
        )
        .unwrap();
        assert_eq!(reopened.target_id(), "people@disk");
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.get(id).unwrap().unwrap().fields, fields("A"));
    }
}

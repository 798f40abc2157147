use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use pgkeeper_core::BackupRecord;
use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};

/// Persistence for backup run metadata.
pub trait BackupRecordStore: Send + Sync {
    fn create(&self, record: &BackupRecord) -> Result<()>;
    fn update(&self, record: &BackupRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<BackupRecord>;
    /// Newest first (by `finished_at`), optionally limited to one datasource.
    fn list(&self, datasource_id: Option<&str>) -> Result<Vec<BackupRecord>>;
    fn delete(&self, id: &str) -> Result<()>;
}

const SELECT_COLUMNS: &str = "SELECT id, datasource_id, trigger, status, file_path, file_name,
        file_size, started_at, finished_at, restored_at
 FROM backups";

pub struct SqliteBackupStore {
    db: Mutex<Connection>,
}

impl SqliteBackupStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("backup connection lock poisoned".to_string()))
    }
}

impl BackupRecordStore for SqliteBackupStore {
    #[instrument(skip(self, record), fields(backup_id = %record.id))]
    fn create(&self, record: &BackupRecord) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO backups
             (id, datasource_id, trigger, status, file_path, file_name, file_size,
              started_at, finished_at, restored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.datasource_id,
                record.trigger.to_string(),
                record.status.to_string(),
                record.file_path,
                record.file_name,
                record.file_size as i64,
                record.started_at.map(|t| t.to_rfc3339()),
                record.finished_at.map(|t| t.to_rfc3339()),
                record.restored_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        debug!(status = %record.status, "backup record created");
        Ok(())
    }

    #[instrument(skip(self, record), fields(backup_id = %record.id))]
    fn update(&self, record: &BackupRecord) -> Result<()> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE backups
             SET trigger = ?1, status = ?2, file_path = ?3, file_name = ?4, file_size = ?5,
                 started_at = ?6, finished_at = ?7, restored_at = ?8
             WHERE id = ?9",
            params![
                record.trigger.to_string(),
                record.status.to_string(),
                record.file_path,
                record.file_name,
                record.file_size as i64,
                record.started_at.map(|t| t.to_rfc3339()),
                record.finished_at.map(|t| t.to_rfc3339()),
                record.restored_at.map(|t| t.to_rfc3339()),
                record.id,
            ],
        )?;
        if n == 0 {
            return Err(not_found(&record.id));
        }
        debug!(status = %record.status, "backup record updated");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<BackupRecord> {
        let db = self.conn()?;
        let row = match db.query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), [id], RawRow::read) {
            Ok(r) => r,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Err(not_found(id)),
            Err(e) => return Err(StoreError::Database(e)),
        };
        row.into_record()
    }

    fn list(&self, datasource_id: Option<&str>) -> Result<Vec<BackupRecord>> {
        let db = self.conn()?;
        // NULL finished_at sorts last under DESC, so in-flight runs trail.
        let raw: Vec<RawRow> = match datasource_id {
            Some(ds) => {
                let mut stmt = db.prepare(&format!(
                    "{SELECT_COLUMNS} WHERE datasource_id = ?1 ORDER BY finished_at DESC"
                ))?;
                let rows = stmt.query_map([ds], RawRow::read)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt =
                    db.prepare(&format!("{SELECT_COLUMNS} ORDER BY finished_at DESC"))?;
                let rows = stmt.query_map([], RawRow::read)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        raw.into_iter().map(RawRow::into_record).collect()
    }

    fn delete(&self, id: &str) -> Result<()> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM backups WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(not_found(id));
        }
        debug!(backup_id = %id, "backup record deleted");
        Ok(())
    }
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        kind: "backup",
        id: id.to_string(),
    }
}

/// Columns as stored; parsed into a `BackupRecord` outside the rusqlite
/// closure so enum/timestamp errors surface as `InvalidRow`.
struct RawRow {
    id: String,
    datasource_id: String,
    trigger: String,
    status: String,
    file_path: String,
    file_name: String,
    file_size: i64,
    started_at: Option<String>,
    finished_at: Option<String>,
    restored_at: Option<String>,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            datasource_id: row.get(1)?,
            trigger: row.get(2)?,
            status: row.get(3)?,
            file_path: row.get(4)?,
            file_name: row.get(5)?,
            file_size: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
            restored_at: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<BackupRecord> {
        Ok(BackupRecord {
            trigger: self.trigger.parse().map_err(StoreError::InvalidRow)?,
            status: self.status.parse().map_err(StoreError::InvalidRow)?,
            file_size: u64::try_from(self.file_size)
                .map_err(|_| StoreError::InvalidRow(format!("negative file_size for {}", self.id)))?,
            started_at: parse_ts(self.started_at)?,
            finished_at: parse_ts(self.finished_at)?,
            restored_at: parse_ts(self.restored_at)?,
            id: self.id,
            datasource_id: self.datasource_id,
            file_path: self.file_path,
            file_name: self.file_name,
        })
    }
}

fn parse_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::InvalidRow(format!("bad timestamp {s:?}: {e}")))
    })
    .transpose()
}

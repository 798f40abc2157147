use std::sync::{Mutex, MutexGuard};

use pgkeeper_core::{Datasource, ScheduleSpec};
use rusqlite::{params, Connection};
use tracing::{debug, info, instrument};

use crate::error::{Result, StoreError};

/// Source of truth for datasource records, as seen by the scheduler.
pub trait DatasourceCatalog: Send + Sync {
    /// Every datasource whose schedule is enabled.
    fn list_enabled(&self) -> Result<Vec<Datasource>>;

    /// A single datasource by ID; `NotFound` if absent.
    fn get(&self, id: &str) -> Result<Datasource>;
}

const SELECT_COLUMNS: &str = "SELECT id, host, port, database, username, password, ssl_mode,
        cron_expr, description, enabled
 FROM datasources";

/// SQLite-backed catalog. Passwords are stored exactly as handed in, so
/// callers encrypt before `create`/`update`.
pub struct SqliteCatalog {
    db: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("catalog connection lock poisoned".to_string()))
    }

    /// All datasources, enabled or not, ordered by database name.
    pub fn list_all(&self) -> Result<Vec<Datasource>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("{SELECT_COLUMNS} ORDER BY database"))?;
        let rows = stmt.query_map([], row_to_datasource)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    #[instrument(skip(self, ds), fields(datasource_id = %ds.id))]
    pub fn create(&self, ds: &Datasource) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO datasources
             (id, host, port, database, username, password, ssl_mode,
              cron_expr, description, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                ds.id,
                ds.host,
                ds.port,
                ds.database,
                ds.username,
                ds.password,
                ds.ssl_mode,
                ds.schedule.expression,
                ds.schedule.description,
                ds.schedule.enabled,
            ],
        )?;
        info!(database = %ds.database, "datasource created");
        Ok(())
    }

    #[instrument(skip(self, ds), fields(datasource_id = %ds.id))]
    pub fn update(&self, ds: &Datasource) -> Result<()> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE datasources
             SET host = ?1, port = ?2, database = ?3, username = ?4, password = ?5,
                 ssl_mode = ?6, cron_expr = ?7, description = ?8, enabled = ?9
             WHERE id = ?10",
            params![
                ds.host,
                ds.port,
                ds.database,
                ds.username,
                ds.password,
                ds.ssl_mode,
                ds.schedule.expression,
                ds.schedule.description,
                ds.schedule.enabled,
                ds.id,
            ],
        )?;
        if n == 0 {
            return Err(not_found(&ds.id));
        }
        debug!("datasource updated");
        Ok(())
    }

    /// Replace the schedule expression (and optionally its description).
    pub fn set_schedule(&self, id: &str, expression: &str, description: Option<&str>) -> Result<()> {
        let mut ds = self.get(id)?;
        ds.schedule.expression = expression.to_string();
        if let Some(d) = description {
            ds.schedule.description = d.to_string();
        }
        self.update(&ds)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE datasources SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        if n == 0 {
            return Err(not_found(id));
        }
        info!(datasource_id = %id, enabled, "datasource schedule toggled");
        Ok(())
    }

    /// Remove a datasource. Its backup records are left untouched.
    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM datasources WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(not_found(id));
        }
        info!(datasource_id = %id, "datasource deleted");
        Ok(())
    }
}

impl DatasourceCatalog for SqliteCatalog {
    fn list_enabled(&self) -> Result<Vec<Datasource>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(&format!("{SELECT_COLUMNS} WHERE enabled = 1"))?;
        let rows = stmt.query_map([], row_to_datasource)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    fn get(&self, id: &str) -> Result<Datasource> {
        let db = self.conn()?;
        match db.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id],
            row_to_datasource,
        ) {
            Ok(ds) => Ok(ds),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(not_found(id)),
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        kind: "datasource",
        id: id.to_string(),
    }
}

/// Map a SQLite row to a `Datasource`.
fn row_to_datasource(row: &rusqlite::Row<'_>) -> rusqlite::Result<Datasource> {
    Ok(Datasource {
        id: row.get(0)?,
        host: row.get(1)?,
        port: row.get(2)?,
        database: row.get(3)?,
        username: row.get(4)?,
        password: row.get(5)?,
        ssl_mode: row.get(6)?,
        schedule: ScheduleSpec {
            expression: row.get(7)?,
            description: row.get(8)?,
            enabled: row.get(9)?,
        },
    })
}

use rusqlite::Connection;

use crate::error::Result;

/// Initialise the datasource and backup tables.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS datasources (
            id          TEXT    NOT NULL PRIMARY KEY,
            host        TEXT    NOT NULL,
            port        INTEGER NOT NULL,
            database    TEXT    NOT NULL,
            username    TEXT    NOT NULL,
            password    TEXT    NOT NULL,   -- encrypted, base64
            ssl_mode    TEXT    NOT NULL,
            cron_expr   TEXT    NOT NULL,
            description TEXT    NOT NULL DEFAULT '',
            enabled     INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_datasources_enabled ON datasources (enabled);

        CREATE TABLE IF NOT EXISTS backups (
            id            TEXT    NOT NULL PRIMARY KEY,
            datasource_id TEXT    NOT NULL,
            trigger       TEXT    NOT NULL,
            status        TEXT    NOT NULL,
            file_path     TEXT    NOT NULL DEFAULT '',
            file_name     TEXT    NOT NULL DEFAULT '',
            file_size     INTEGER NOT NULL DEFAULT 0,
            started_at    TEXT,               -- RFC 3339 or NULL
            finished_at   TEXT,
            restored_at   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_backups_datasource
            ON backups (datasource_id, finished_at DESC);",
    )?;
    Ok(())
}

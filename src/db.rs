use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

pub fn connect(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS export_checkpoints (
            output_path     TEXT PRIMARY KEY,
            window_end      INTEGER NOT NULL,
            records_written INTEGER NOT NULL DEFAULT 0,
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Checkpoints ──

/// Last fully written window for one export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub output_path: String,
    pub window_end: DateTime<Utc>,
    pub records_written: usize,
    pub updated_at: String,
}

pub fn save_checkpoint(
    conn: &Connection,
    output_path: &str,
    window_end: DateTime<Utc>,
    records_written: usize,
) -> Result<()> {
    conn.execute(
        "INSERT INTO export_checkpoints (output_path, window_end, records_written, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(output_path) DO UPDATE SET
             window_end = excluded.window_end,
             records_written = excluded.records_written,
             updated_at = excluded.updated_at",
        rusqlite::params![output_path, window_end.timestamp(), records_written],
    )?;
    Ok(())
}

pub fn load_checkpoint(conn: &Connection, output_path: &str) -> Result<Option<Checkpoint>> {
    let row = conn
        .query_row(
            "SELECT output_path, window_end, records_written, updated_at
             FROM export_checkpoints WHERE output_path = ?1",
            [output_path],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, usize>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(output_path, end, records_written, updated_at)| -> Result<Checkpoint> {
        let window_end = DateTime::from_timestamp(end, 0)
            .with_context(|| format!("Stored window_end {} is out of range", end))?;
        Ok(Checkpoint {
            output_path,
            window_end,
            records_written,
            updated_at,
        })
    })
    .transpose()
}

pub fn clear_checkpoint(conn: &Connection, output_path: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM export_checkpoints WHERE output_path = ?1",
        [output_path],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let conn = memory();
        assert!(load_checkpoint(&conn, "data/a.csv").unwrap().is_none());
    }

    #[test]
    fn save_overwrites_previous() {
        let conn = memory();
        let t1 = Utc.with_ymd_and_hms(2024, 3, 14, 6, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap();
        save_checkpoint(&conn, "data/a.csv", t1, 3).unwrap();
        save_checkpoint(&conn, "data/a.csv", t2, 7).unwrap();
        save_checkpoint(&conn, "data/b.csv", t1, 1).unwrap();

        let cp = load_checkpoint(&conn, "data/a.csv").unwrap().unwrap();
        assert_eq!(cp.window_end, t2);
        assert_eq!(cp.records_written, 7);

        assert_eq!(clear_checkpoint(&conn, "data/a.csv").unwrap(), 1);
        assert!(load_checkpoint(&conn, "data/a.csv").unwrap().is_none());
        assert!(load_checkpoint(&conn, "data/b.csv").unwrap().is_some());
    }

    #[test]
    fn connect_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/export.sqlite");
        let conn = connect(&path).unwrap();
        init_schema(&conn).unwrap();
        assert!(path.exists());
    }
}

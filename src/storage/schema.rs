//! SQLite schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Version recorded in `schema_version` once the tables below exist.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id INTEGER PRIMARY KEY,
            pipeline_name TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('success', 'error')),
            details TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TRIGGER IF NOT EXISTS pipeline_runs_no_update
        BEFORE UPDATE ON pipeline_runs
        BEGIN
            SELECT RAISE(ABORT, 'pipeline_runs is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS pipeline_runs_no_delete
        BEFORE DELETE ON pipeline_runs
        BEGIN
            SELECT RAISE(ABORT, 'pipeline_runs is append-only');
        END;

        CREATE TABLE IF NOT EXISTS raw_events (
            event_id TEXT PRIMARY KEY,
            user_id INTEGER,
            event_type TEXT NOT NULL,
            event_ts TEXT NOT NULL,
            device_type TEXT,
            price REAL,
            currency TEXT,
            source_version TEXT,
            geo_country TEXT,
            campaign_id TEXT,
            loaded_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_pipeline_runs_created ON pipeline_runs(created_at);
        CREATE INDEX IF NOT EXISTS idx_raw_events_ts ON raw_events(event_ts);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        // Verify tables exist by querying them
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM pipeline_runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM raw_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_migrate_records_schema_version_once() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let mut stmt = conn.prepare("SELECT version FROM schema_version").unwrap();
        let versions: Vec<i64> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|version| version.unwrap())
            .collect();
        assert_eq!(versions, [SCHEMA_VERSION]);
    }

    #[test]
    fn test_pipeline_runs_rejects_update_and_delete() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO pipeline_runs (pipeline_name, status, details) VALUES ('p', 'success', 'ok')",
            [],
        )
        .unwrap();

        assert!(conn.execute("UPDATE pipeline_runs SET status = 'error'", []).is_err());
        assert!(conn.execute("DELETE FROM pipeline_runs", []).is_err());
    }

    #[test]
    fn test_status_constrained() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert!(conn
            .execute(
                "INSERT INTO pipeline_runs (pipeline_name, status, details) VALUES ('p', 'running', '')",
                [],
            )
            .is_err());
    }
}

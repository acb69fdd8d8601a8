use rusqlite::Connection;
use sextant_core::constants::SCHEMA_VERSION;
use sextant_core::error::StateError;
use tracing::info;

/// Create all tables and run pending migrations. Idempotent.
pub fn create_tables(conn: &Connection) -> Result<(), StateError> {
    conn.execute_batch(SCHEMA_SQL).map_err(StateError::sqlite)?;
    migrate(conn)?;
    info!(version = SCHEMA_VERSION, "SQLite schema ready");
    Ok(())
}

/// Apply migrations up to `SCHEMA_VERSION`, recording each in `schema_migrations`.
pub fn migrate(conn: &Connection) -> Result<(), StateError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(StateError::sqlite)?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(StateError::sqlite)?;

    type MigrationFn = fn(&Connection) -> Result<(), StateError>;

    // Index 0 is V1, the baseline created by SCHEMA_SQL.
    let migrations: &[MigrationFn] = &[|_conn| Ok(())];

    for version in (current + 1)..=SCHEMA_VERSION {
        let idx = (version - 1) as usize;
        if let Some(step) = migrations.get(idx) {
            step(conn)?;
        }
        conn.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(StateError::sqlite)?;
        info!(version, "Applied schema migration");
    }

    Ok(())
}

/// Highest applied schema version, 0 for an empty database.
pub fn current_version(conn: &Connection) -> Result<u32, StateError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(StateError::sqlite)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS symbol_mappings (
    stable_id TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT 'active',
    backend_stable_id TEXT,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    qualified_container TEXT NOT NULL DEFAULT '',
    path TEXT,
    line INTEGER,
    "column" INTEGER,
    end_line INTEGER,
    end_column INTEGER,
    last_verified_at TEXT NOT NULL,
    last_verified_state_id TEXT NOT NULL,
    deleted_at TEXT,
    deleted_in_state_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_symbol_mappings_backend_id
    ON symbol_mappings(backend_stable_id);
CREATE INDEX IF NOT EXISTS idx_symbol_mappings_name
    ON symbol_mappings(name, state);

CREATE TABLE IF NOT EXISTS symbol_aliases (
    old_stable_id TEXT NOT NULL,
    new_stable_id TEXT NOT NULL,
    reason TEXT NOT NULL,
    confidence REAL NOT NULL,
    created_at TEXT NOT NULL,
    created_state_id TEXT NOT NULL,
    PRIMARY KEY(old_stable_id, new_stable_id)
);

CREATE INDEX IF NOT EXISTS idx_symbol_aliases_old
    ON symbol_aliases(old_stable_id, confidence DESC);

CREATE TABLE IF NOT EXISTS jobs (
    job_id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    scope TEXT,
    status TEXT NOT NULL DEFAULT 'queued',
    progress INTEGER NOT NULL DEFAULT 0,
    result_json TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_created
    ON jobs(created_at DESC);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn create_tables_builds_all_tables() {
        let conn = db::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        for table in ["symbol_mappings", "symbol_aliases", "jobs", "schema_migrations"] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn create_tables_is_idempotent() {
        let conn = db::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        let applied: u32 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, SCHEMA_VERSION);
    }
}

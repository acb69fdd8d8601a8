use rusqlite::Connection;
use sextant_core::config::StorageConfig;
use sextant_core::error::StateError;
use std::path::Path;
use tracing::info;

/// Open a connection using the `[storage]` section of the config.
pub fn open_with_storage_config(
    db_path: &Path,
    storage: &StorageConfig,
) -> Result<Connection, StateError> {
    open_connection_with_config(db_path, storage.busy_timeout_ms, storage.cache_size)
}

fn open_connection_with_config(
    db_path: &Path,
    busy_timeout_ms: u32,
    cache_size: i32,
) -> Result<Connection, StateError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(StateError::Io)?;
    }

    let conn = Connection::open(db_path).map_err(StateError::sqlite)?;
    apply_pragmas(&conn, busy_timeout_ms, cache_size)?;

    info!(?db_path, "SQLite connection opened");
    Ok(conn)
}

/// In-memory database with the same pragmas, for ephemeral engines.
pub fn open_in_memory() -> Result<Connection, StateError> {
    let conn = Connection::open_in_memory().map_err(StateError::sqlite)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(StateError::sqlite)?;
    Ok(conn)
}

fn apply_pragmas(
    conn: &Connection,
    busy_timeout_ms: u32,
    cache_size: i32,
) -> Result<(), StateError> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {busy_timeout_ms};
         PRAGMA cache_size = {cache_size};"
    ))
    .map_err(StateError::sqlite)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn state_db_uses_wal_and_creates_parent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested/data/state.db");
        let storage = StorageConfig {
            data_dir: dir.path().display().to_string(),
            ..StorageConfig::default()
        };
        let conn = open_with_storage_config(&db_path, &storage).unwrap();
        assert!(db_path.exists());

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn storage_config_pragmas_are_applied() {
        let dir = tempdir().unwrap();
        let storage = StorageConfig {
            data_dir: dir.path().display().to_string(),
            busy_timeout_ms: 1234,
            cache_size: -2000,
        };
        let conn = open_with_storage_config(&dir.path().join("state.db"), &storage).unwrap();
        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 1234);
    }
}

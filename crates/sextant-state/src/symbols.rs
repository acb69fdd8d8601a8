use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use sextant_core::error::StateError;
use sextant_core::types::{Location, SymbolFingerprint, SymbolKind, SymbolMapping, SymbolState};

const MAPPING_COLUMNS: &str = "stable_id, state, backend_stable_id, name, kind, qualified_container, path, line, \"column\", end_line, end_column, last_verified_at, last_verified_state_id, deleted_at, deleted_in_state_id";

const UPSERT_SQL: &str = "INSERT INTO symbol_mappings (stable_id, state, backend_stable_id, name, kind, qualified_container, path, line, \"column\", end_line, end_column, last_verified_at, last_verified_state_id, deleted_at, deleted_in_state_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
     ON CONFLICT(stable_id) DO UPDATE SET
        state = excluded.state,
        backend_stable_id = excluded.backend_stable_id,
        name = excluded.name,
        kind = excluded.kind,
        qualified_container = excluded.qualified_container,
        path = excluded.path,
        line = excluded.line,
        \"column\" = excluded.\"column\",
        end_line = excluded.end_line,
        end_column = excluded.end_column,
        last_verified_at = excluded.last_verified_at,
        last_verified_state_id = excluded.last_verified_state_id,
        deleted_at = excluded.deleted_at,
        deleted_in_state_id = excluded.deleted_in_state_id";

fn execute_upsert(conn: &Connection, m: &SymbolMapping) -> rusqlite::Result<usize> {
    let loc = m.location.as_ref();
    conn.execute(
        UPSERT_SQL,
        params![
            m.stable_id,
            m.state.as_str(),
            m.backend_stable_id,
            m.fingerprint.name,
            m.fingerprint.kind.as_str(),
            m.fingerprint.qualified_container,
            loc.map(|l| l.path.as_str()),
            loc.map(|l| l.line),
            loc.map(|l| l.column),
            loc.and_then(|l| l.end_line),
            loc.and_then(|l| l.end_column),
            m.last_verified_at,
            m.last_verified_state_id,
            m.deleted_at,
            m.deleted_in_state_id,
        ],
    )
}

/// Insert or replace one identity mapping.
pub fn upsert_mapping(conn: &Connection, mapping: &SymbolMapping) -> Result<(), StateError> {
    execute_upsert(conn, mapping).map_err(StateError::sqlite)?;
    Ok(())
}

/// Upsert many mappings in one transaction.
pub fn bulk_upsert(conn: &mut Connection, mappings: &[SymbolMapping]) -> Result<(), StateError> {
    let tx = conn.transaction().map_err(StateError::sqlite)?;
    for mapping in mappings {
        execute_upsert(&tx, mapping).map_err(StateError::sqlite)?;
    }
    tx.commit().map_err(StateError::sqlite)?;
    Ok(())
}

pub fn get_mapping(
    conn: &Connection,
    stable_id: &str,
) -> Result<Option<SymbolMapping>, StateError> {
    conn.query_row(
        &format!("SELECT {MAPPING_COLUMNS} FROM symbol_mappings WHERE stable_id = ?1"),
        params![stable_id],
        row_to_mapping,
    )
    .optional()
    .map_err(StateError::sqlite)
}

/// Look up by backend-native id, preferring an active mapping.
pub fn get_by_backend_id(
    conn: &Connection,
    backend_stable_id: &str,
) -> Result<Option<SymbolMapping>, StateError> {
    conn.query_row(
        &format!(
            "SELECT {MAPPING_COLUMNS} FROM symbol_mappings
             WHERE backend_stable_id = ?1
             ORDER BY CASE state WHEN 'active' THEN 0 ELSE 1 END, stable_id ASC
             LIMIT 1"
        ),
        params![backend_stable_id],
        row_to_mapping,
    )
    .optional()
    .map_err(StateError::sqlite)
}

/// Active mappings whose name matches exactly, ordered by stable id.
pub fn find_active_by_name(
    conn: &Connection,
    name: &str,
) -> Result<Vec<SymbolMapping>, StateError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {MAPPING_COLUMNS} FROM symbol_mappings
             WHERE name = ?1 AND state = 'active'
             ORDER BY stable_id ASC"
        ))
        .map_err(StateError::sqlite)?;
    let rows = stmt
        .query_map(params![name], row_to_mapping)
        .map_err(StateError::sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

pub fn list_active(conn: &Connection) -> Result<Vec<SymbolMapping>, StateError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {MAPPING_COLUMNS} FROM symbol_mappings
             WHERE state = 'active'
             ORDER BY stable_id ASC"
        ))
        .map_err(StateError::sqlite)?;
    let rows = stmt
        .query_map([], row_to_mapping)
        .map_err(StateError::sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

/// Soft-delete a mapping. Returns false when it was missing or already deleted.
pub fn mark_deleted(
    conn: &Connection,
    stable_id: &str,
    deleted_at: &str,
    state_id: &str,
) -> Result<bool, StateError> {
    let changed = conn
        .execute(
            "UPDATE symbol_mappings
             SET state = 'deleted', deleted_at = ?2, deleted_in_state_id = ?3
             WHERE stable_id = ?1 AND state = 'active'",
            params![stable_id, deleted_at, state_id],
        )
        .map_err(StateError::sqlite)?;
    Ok(changed > 0)
}

pub fn count_by_state(conn: &Connection, state: SymbolState) -> Result<u64, StateError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM symbol_mappings WHERE state = ?1",
            params![state.as_str()],
            |row| row.get(0),
        )
        .map_err(StateError::sqlite)?;
    Ok(count.max(0) as u64)
}

fn invalid_text(idx: usize, column: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, column.to_string(), Type::Text)
}

fn row_to_mapping(row: &Row<'_>) -> rusqlite::Result<SymbolMapping> {
    let state_raw: String = row.get(1)?;
    let state = SymbolState::parse(&state_raw).ok_or_else(|| invalid_text(1, "state"))?;
    let kind_raw: String = row.get(4)?;
    let kind = SymbolKind::parse_kind(&kind_raw).ok_or_else(|| invalid_text(4, "kind"))?;
    let path: Option<String> = row.get(6)?;
    let location = match path {
        Some(path) => Some(Location {
            path,
            line: row.get::<_, Option<u32>>(7)?.unwrap_or(0),
            column: row.get::<_, Option<u32>>(8)?.unwrap_or(0),
            end_line: row.get(9)?,
            end_column: row.get(10)?,
        }),
        None => None,
    };

    Ok(SymbolMapping {
        stable_id: row.get(0)?,
        state,
        backend_stable_id: row.get(2)?,
        fingerprint: SymbolFingerprint {
            name: row.get(3)?,
            kind,
            qualified_container: row.get(5)?,
        },
        location,
        last_verified_at: row.get(11)?,
        last_verified_state_id: row.get(12)?,
        deleted_at: row.get(13)?,
        deleted_in_state_id: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, schema};

    fn setup() -> Connection {
        let conn = db::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn
    }

    fn mapping(stable_id: &str, name: &str, backend: Option<&str>) -> SymbolMapping {
        SymbolMapping {
            stable_id: stable_id.into(),
            state: SymbolState::Active,
            backend_stable_id: backend.map(Into::into),
            fingerprint: SymbolFingerprint {
                name: name.into(),
                kind: SymbolKind::Method,
                qualified_container: "src/engine/Engine".into(),
            },
            location: Some(Location::new("src/engine.rs", 12, 4)),
            last_verified_at: "2026-01-01T00:00:00Z".into(),
            last_verified_state_id: "s1".into(),
            deleted_at: None,
            deleted_in_state_id: None,
        }
    }

    #[test]
    fn upsert_then_get_preserves_fields() {
        let conn = setup();
        let m = mapping("src/engine/Engine#search()", "search", Some("be-1"));
        upsert_mapping(&conn, &m).unwrap();
        let loaded = get_mapping(&conn, &m.stable_id).unwrap().unwrap();
        assert_eq!(loaded, m);
        assert!(get_mapping(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn upsert_overwrites_existing_row() {
        let conn = setup();
        let mut m = mapping("a#f()", "f", None);
        upsert_mapping(&conn, &m).unwrap();
        m.location = Some(Location::new("src/moved.rs", 3, 0));
        m.last_verified_state_id = "s2".into();
        upsert_mapping(&conn, &m).unwrap();
        let loaded = get_mapping(&conn, "a#f()").unwrap().unwrap();
        assert_eq!(loaded.location.unwrap().path, "src/moved.rs");
        assert_eq!(loaded.last_verified_state_id, "s2");
    }

    #[test]
    fn mark_deleted_is_soft_and_single_shot() {
        let conn = setup();
        upsert_mapping(&conn, &mapping("a#f()", "f", None)).unwrap();
        assert!(mark_deleted(&conn, "a#f()", "2026-02-01T00:00:00Z", "s9").unwrap());
        assert!(!mark_deleted(&conn, "a#f()", "2026-03-01T00:00:00Z", "s10").unwrap());

        let loaded = get_mapping(&conn, "a#f()").unwrap().unwrap();
        assert!(loaded.is_deleted());
        assert_eq!(loaded.deleted_at.as_deref(), Some("2026-02-01T00:00:00Z"));
        assert_eq!(loaded.deleted_in_state_id.as_deref(), Some("s9"));
        assert!(list_active(&conn).unwrap().is_empty());
        assert_eq!(count_by_state(&conn, SymbolState::Deleted).unwrap(), 1);
    }

    #[test]
    fn backend_lookup_prefers_active_mapping() {
        let mut conn = setup();
        let old = mapping("a#old()", "old", Some("be-7"));
        let new = mapping("a#new()", "new", Some("be-7"));
        bulk_upsert(&mut conn, &[old, new]).unwrap();
        mark_deleted(&conn, "a#old()", "2026-02-01T00:00:00Z", "s2").unwrap();

        let found = get_by_backend_id(&conn, "be-7").unwrap().unwrap();
        assert_eq!(found.stable_id, "a#new()");
    }

    #[test]
    fn find_by_name_returns_only_active_sorted() {
        let mut conn = setup();
        bulk_upsert(
            &mut conn,
            &[
                mapping("b#run()", "run", None),
                mapping("a#run()", "run", None),
                mapping("c#run()", "run", None),
            ],
        )
        .unwrap();
        mark_deleted(&conn, "c#run()", "2026-02-01T00:00:00Z", "s2").unwrap();
        let ids: Vec<String> = find_active_by_name(&conn, "run")
            .unwrap()
            .into_iter()
            .map(|m| m.stable_id)
            .collect();
        assert_eq!(ids, vec!["a#run()".to_string(), "b#run()".to_string()]);
    }

    #[test]
    fn mapping_without_location_round_trips() {
        let conn = setup();
        let mut m = mapping("x#y()", "y", None);
        m.location = None;
        upsert_mapping(&conn, &m).unwrap();
        assert!(get_mapping(&conn, "x#y()").unwrap().unwrap().location.is_none());
    }
}

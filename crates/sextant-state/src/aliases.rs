use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use sextant_core::error::StateError;
use sextant_core::types::{AliasReason, SymbolAlias};

/// Record a redirect. Re-inserting the same `(old, new)` pair is a no-op.
pub fn insert_alias(conn: &Connection, alias: &SymbolAlias) -> Result<bool, StateError> {
    let inserted = conn
        .execute(
            "INSERT INTO symbol_aliases (old_stable_id, new_stable_id, reason, confidence, created_at, created_state_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(old_stable_id, new_stable_id) DO NOTHING",
            params![
                alias.old_stable_id,
                alias.new_stable_id,
                alias.reason.as_str(),
                alias.confidence,
                alias.created_at,
                alias.created_state_id,
            ],
        )
        .map_err(StateError::sqlite)?;
    Ok(inserted > 0)
}

/// Outgoing aliases for `old_stable_id`, highest confidence first, ties by new id.
pub fn aliases_from(
    conn: &Connection,
    old_stable_id: &str,
) -> Result<Vec<SymbolAlias>, StateError> {
    let mut stmt = conn
        .prepare(
            "SELECT old_stable_id, new_stable_id, reason, confidence, created_at, created_state_id
             FROM symbol_aliases
             WHERE old_stable_id = ?1
             ORDER BY confidence DESC, new_stable_id ASC",
        )
        .map_err(StateError::sqlite)?;
    let rows = stmt
        .query_map(params![old_stable_id], row_to_alias)
        .map_err(StateError::sqlite)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StateError::sqlite)
}

pub fn count_aliases(conn: &Connection) -> Result<u64, StateError> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM symbol_aliases", [], |row| row.get(0))
        .map_err(StateError::sqlite)?;
    Ok(count.max(0) as u64)
}

fn row_to_alias(row: &Row<'_>) -> rusqlite::Result<SymbolAlias> {
    let reason_raw: String = row.get(2)?;
    let reason = AliasReason::parse(&reason_raw)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(2, "reason".into(), Type::Text))?;
    Ok(SymbolAlias {
        old_stable_id: row.get(0)?,
        new_stable_id: row.get(1)?,
        reason,
        confidence: row.get(3)?,
        created_at: row.get(4)?,
        created_state_id: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, schema};

    fn alias(old: &str, new: &str, reason: AliasReason, confidence: f64) -> SymbolAlias {
        SymbolAlias {
            old_stable_id: old.into(),
            new_stable_id: new.into(),
            reason,
            confidence,
            created_at: "2026-01-01T00:00:00Z".into(),
            created_state_id: "s1".into(),
        }
    }

    #[test]
    fn insert_is_idempotent_per_pair() {
        let conn = db::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        let a = alias("a#old()", "a#new()", AliasReason::Renamed, 0.95);
        assert!(insert_alias(&conn, &a).unwrap());
        assert!(!insert_alias(&conn, &a).unwrap());
        assert_eq!(count_aliases(&conn).unwrap(), 1);
    }

    #[test]
    fn aliases_are_ordered_by_confidence_then_id() {
        let conn = db::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        insert_alias(&conn, &alias("x", "z", AliasReason::FuzzyMatch, 0.7)).unwrap();
        insert_alias(&conn, &alias("x", "b", AliasReason::FuzzyMatch, 0.7)).unwrap();
        insert_alias(&conn, &alias("x", "m", AliasReason::Renamed, 0.95)).unwrap();
        insert_alias(&conn, &alias("y", "q", AliasReason::Moved, 0.9)).unwrap();

        let targets: Vec<String> = aliases_from(&conn, "x")
            .unwrap()
            .into_iter()
            .map(|a| a.new_stable_id)
            .collect();
        assert_eq!(targets, vec!["m", "b", "z"]);
        assert_eq!(aliases_from(&conn, "x").unwrap()[0].reason, AliasReason::Renamed);
        assert!(aliases_from(&conn, "nope").unwrap().is_empty());
    }
}

use rusqlite::Connection;
use sextant_core::error::StateError;
use sextant_core::types::{SymbolAlias, SymbolMapping};
use sextant_state::{aliases, symbols};
use std::sync::{Mutex, MutexGuard};

/// Persistence seam for identity mappings and alias redirects.
pub trait IdentityStore: Send + Sync {
    fn get_mapping(&self, stable_id: &str) -> Result<Option<SymbolMapping>, StateError>;
    fn get_by_backend_id(&self, backend_id: &str) -> Result<Option<SymbolMapping>, StateError>;
    fn find_active_by_name(&self, name: &str) -> Result<Vec<SymbolMapping>, StateError>;
    fn list_active(&self) -> Result<Vec<SymbolMapping>, StateError>;
    fn upsert_many(&self, mappings: &[SymbolMapping]) -> Result<(), StateError>;
    fn mark_deleted(&self, stable_id: &str, at: &str, state_id: &str) -> Result<bool, StateError>;
    fn insert_alias(&self, alias: &SymbolAlias) -> Result<bool, StateError>;
    fn aliases_from(&self, old_stable_id: &str) -> Result<Vec<SymbolAlias>, StateError>;
}

/// SQLite-backed store sharing one connection behind a mutex.
pub struct SqliteIdentityStore {
    conn: Mutex<Connection>,
}

impl SqliteIdentityStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|_| StateError::Sqlite("identity store lock poisoned".to_string()))
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn get_mapping(&self, stable_id: &str) -> Result<Option<SymbolMapping>, StateError> {
        symbols::get_mapping(&*self.lock()?, stable_id)
    }

    fn get_by_backend_id(&self, backend_id: &str) -> Result<Option<SymbolMapping>, StateError> {
        symbols::get_by_backend_id(&*self.lock()?, backend_id)
    }

    fn find_active_by_name(&self, name: &str) -> Result<Vec<SymbolMapping>, StateError> {
        symbols::find_active_by_name(&*self.lock()?, name)
    }

    fn list_active(&self) -> Result<Vec<SymbolMapping>, StateError> {
        symbols::list_active(&*self.lock()?)
    }

    fn upsert_many(&self, mappings: &[SymbolMapping]) -> Result<(), StateError> {
        let mut conn = self.lock()?;
        symbols::bulk_upsert(&mut conn, mappings)
    }

    fn mark_deleted(&self, stable_id: &str, at: &str, state_id: &str) -> Result<bool, StateError> {
        symbols::mark_deleted(&*self.lock()?, stable_id, at, state_id)
    }

    fn insert_alias(&self, alias: &SymbolAlias) -> Result<bool, StateError> {
        aliases::insert_alias(&*self.lock()?, alias)
    }

    fn aliases_from(&self, old_stable_id: &str) -> Result<Vec<SymbolAlias>, StateError> {
        aliases::aliases_from(&*self.lock()?, old_stable_id)
    }
}

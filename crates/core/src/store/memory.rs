//! In-memory store.

use super::{BorrowerStore, CheckpointStore, Scope, ScopeState, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Volatile store; state is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    scopes: RwLock<HashMap<Scope, ScopeState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn checkpoint(&self, scope: &Scope) -> Result<u32, StoreError> {
        Ok(self
            .scopes
            .read()
            .get(scope)
            .map(|s| s.checkpoint)
            .unwrap_or(0))
    }

    fn set_checkpoint(&self, scope: &Scope, ledger: u32) -> Result<(), StoreError> {
        self.scopes
            .write()
            .entry(scope.clone())
            .or_default()
            .advance(scope, ledger)
    }
}

impl BorrowerStore for MemoryStore {
    fn borrowers(&self, scope: &Scope) -> Result<Vec<String>, StoreError> {
        Ok(self
            .scopes
            .read()
            .get(scope)
            .map(|s| s.borrowers.clone())
            .unwrap_or_default())
    }

    fn upsert_borrowers(&self, scope: &Scope, borrowers: &[String]) -> Result<usize, StoreError> {
        Ok(self
            .scopes
            .write()
            .entry(scope.clone())
            .or_default()
            .upsert(borrowers))
    }

    fn remove_borrower(&self, scope: &Scope, borrower: &str) -> Result<bool, StoreError> {
        Ok(self
            .scopes
            .write()
            .get_mut(scope)
            .map(|s| s.remove(borrower))
            .unwrap_or(false))
    }
}

//! Persistent keeper state: the sync checkpoint and the tracked borrowers.
//!
//! State is partitioned by [`Scope`] so one store file can serve several
//! pools or chains.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::path::PathBuf;
use thiserror::Error;

/// Chain and pool a piece of state belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    pub chain: String,
    pub pool: String,
}

impl Scope {
    pub fn new(chain: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            pool: pool.into(),
        }
    }

    /// Key used in the persisted document.
    pub(crate) fn key(&self) -> String {
        format!("{}:{}", self.chain, self.pool)
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain, self.pool)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state document: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("checkpoint for {scope} cannot move back from {current} to {requested}")]
    CheckpointRegression {
        scope: String,
        current: u32,
        requested: u32,
    },
}

/// Last fully processed ledger per scope; `0` means never synced.
pub trait CheckpointStore: Send + Sync + Debug {
    fn checkpoint(&self, scope: &Scope) -> Result<u32, StoreError>;

    /// Durably record `ledger` as processed. Never moves backwards.
    fn set_checkpoint(&self, scope: &Scope, ledger: u32) -> Result<(), StoreError>;
}

/// Borrowers tracked per scope, in first-seen order.
pub trait BorrowerStore: Send + Sync + Debug {
    fn borrowers(&self, scope: &Scope) -> Result<Vec<String>, StoreError>;

    /// Track `borrowers`; already tracked ones are ignored. Returns how many
    /// were new.
    fn upsert_borrowers(&self, scope: &Scope, borrowers: &[String]) -> Result<usize, StoreError>;

    /// Stop tracking `borrower`. Returns whether it was tracked.
    fn remove_borrower(&self, scope: &Scope, borrower: &str) -> Result<bool, StoreError>;
}

/// Everything stored for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ScopeState {
    #[serde(default)]
    pub checkpoint: u32,
    #[serde(default)]
    pub borrowers: Vec<String>,
}

impl ScopeState {
    pub fn advance(&mut self, scope: &Scope, ledger: u32) -> Result<(), StoreError> {
        if ledger < self.checkpoint {
            return Err(StoreError::CheckpointRegression {
                scope: scope.to_string(),
                current: self.checkpoint,
                requested: ledger,
            });
        }
        self.checkpoint = ledger;
        Ok(())
    }

    pub fn upsert(&mut self, borrowers: &[String]) -> usize {
        let mut added = 0;
        for borrower in borrowers {
            if !self.borrowers.contains(borrower) {
                self.borrowers.push(borrower.clone());
                added += 1;
            }
        }
        added
    }

    pub fn remove(&mut self, borrower: &str) -> bool {
        let before = self.borrowers.len();
        self.borrowers.retain(|b| b != borrower);
        self.borrowers.len() != before
    }
}

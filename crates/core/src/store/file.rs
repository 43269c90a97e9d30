//! Durable JSON file store.
//!
//! Every mutation rewrites the whole document to a sibling temporary file and
//! renames it over the target, so the file on disk always holds either the
//! previous or the new state. The in-memory copy is only updated after the
//! rename, and the fsync of its directory, succeeded.
//!
//! Writes are blocking and run on the calling task. The document holds one
//! checkpoint and a borrower list per scope, and is rewritten at most once per
//! ledger and once per liquidation.

use super::{BorrowerStore, CheckpointStore, Scope, ScopeState, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    scopes: BTreeMap<String, ScopeState>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        info!(
            path = %path.display(),
            scopes = doc.scopes.len(),
            "Opened keeper state"
        );
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to the scope's state and persist the result.
    fn mutate<T>(
        &self,
        scope: &Scope,
        f: impl FnOnce(&mut ScopeState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut doc = self.doc.lock();
        let mut next = doc.clone();
        let out = f(next.scopes.entry(scope.key()).or_default())?;
        next.updated_at = Some(Utc::now());
        self.persist(&next)?;
        *doc = next;
        Ok(out)
    }

    fn persist(&self, doc: &Document) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        sync_dir(&self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Persisted keeper state");
        Ok(())
    }
}

/// Flush the directory holding `path`, so the rename survives a crash.
#[cfg(unix)]
fn sync_dir(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl CheckpointStore for JsonFileStore {
    fn checkpoint(&self, scope: &Scope) -> Result<u32, StoreError> {
        Ok(self
            .doc
            .lock()
            .scopes
            .get(&scope.key())
            .map(|s| s.checkpoint)
            .unwrap_or(0))
    }

    fn set_checkpoint(&self, scope: &Scope, ledger: u32) -> Result<(), StoreError> {
        self.mutate(scope, |state| state.advance(scope, ledger))
    }
}

impl BorrowerStore for JsonFileStore {
    fn borrowers(&self, scope: &Scope) -> Result<Vec<String>, StoreError> {
        Ok(self
            .doc
            .lock()
            .scopes
            .get(&scope.key())
            .map(|s| s.borrowers.clone())
            .unwrap_or_default())
    }

    fn upsert_borrowers(&self, scope: &Scope, borrowers: &[String]) -> Result<usize, StoreError> {
        if borrowers.is_empty() {
            return Ok(0);
        }
        self.mutate(scope, |state| Ok(state.upsert(borrowers)))
    }

    fn remove_borrower(&self, scope: &Scope, borrower: &str) -> Result<bool, StoreError> {
        self.mutate(scope, |state| Ok(state.remove(borrower)))
    }
}

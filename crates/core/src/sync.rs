//! Ledger event synchronizer.
//!
//! Walks ledgers from the checkpoint towards the chain head, collects the
//! borrowers of every `borrow` event emitted by the pool and advances the
//! checkpoint only after the ledger's borrowers are stored. A crash between
//! the two writes reprocesses the ledger, which is harmless because upserts
//! are idempotent.

use crate::store::{BorrowerStore, CheckpointStore, Scope, StoreError};
use keeper_chain::codec::decode;
use keeper_chain::ledger::{event_contract, event_topics};
use keeper_chain::{
    ArchiveError, ArchiveReader, ChainReader, Delay, LedgerTransaction, NativeValue, ReadError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const BORROW_TOPIC: &str = "borrow";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("reading chain head: {0}")]
    Read(#[from] ReadError),

    #[error("fetching ledger: {0}")]
    Archive(#[from] ArchiveError),

    #[error("ledger {ledger} still missing from archive after {attempts} attempts")]
    ArchiveExhausted { ledger: u32, attempts: u32 },

    /// A pool event whose topics cannot be read.
    #[error("malformed pool event in transaction {tx}: {reason}")]
    MalformedEvent { tx: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Synchronizer tuning.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// First ledger to scan when nothing was synced yet
    pub creation_ledger: u32,
    /// Fetch attempts per ledger while the archive reports it missing
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            creation_ledger: 0,
            retry_attempts: 10,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub ledgers_processed: u32,
    /// Borrow events seen, duplicates included
    pub borrow_events: usize,
    /// Borrowers that were not tracked before
    pub new_borrowers: usize,
    pub checkpoint: u32,
}

/// Borrowers of successful `borrow` events emitted by `pool`, in event order.
///
/// A pool event whose first topic does not decode, or a `borrow` event
/// without a borrower address, is an error rather than a skip.
pub fn borrowers_in(
    transactions: &[LedgerTransaction],
    pool: &str,
) -> Result<Vec<String>, SyncError> {
    let mut borrowers = Vec::new();
    for tx in transactions.iter().filter(|tx| tx.successful) {
        let malformed = |reason: String| SyncError::MalformedEvent {
            tx: tx.hash.clone(),
            reason,
        };
        for event in &tx.events {
            if event_contract(event).as_deref() != Some(pool) {
                continue;
            }
            let topics = event_topics(event);
            let Some(first) = topics.first() else {
                continue;
            };
            let name = decode(first).map_err(|e| malformed(format!("topic 0: {e}")))?;
            if name.as_str() != Some(BORROW_TOPIC) {
                continue;
            }
            let who = topics
                .get(1)
                .ok_or_else(|| malformed("borrow event without borrower".to_string()))?;
            match decode(who).map_err(|e| malformed(format!("topic 1: {e}")))? {
                NativeValue::Address(who) => borrowers.push(who),
                other => return Err(malformed(format!("borrower is not an address: {other:?}"))),
            }
        }
    }
    Ok(borrowers)
}

#[derive(Debug)]
pub struct LedgerSynchronizer {
    chain: Arc<dyn ChainReader>,
    archive: Arc<dyn ArchiveReader>,
    checkpoints: Arc<dyn CheckpointStore>,
    borrowers: Arc<dyn BorrowerStore>,
    delay: Arc<dyn Delay>,
    scope: Scope,
    settings: SyncSettings,
}

impl LedgerSynchronizer {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        archive: Arc<dyn ArchiveReader>,
        checkpoints: Arc<dyn CheckpointStore>,
        borrowers: Arc<dyn BorrowerStore>,
        delay: Arc<dyn Delay>,
        scope: Scope,
    ) -> Self {
        Self {
            chain,
            archive,
            checkpoints,
            borrowers,
            delay,
            scope,
            settings: SyncSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Process every ledger between the checkpoint and the chain head.
    #[instrument(skip(self), fields(scope = %self.scope))]
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let mut head = self.chain.latest_ledger().await?;
        let checkpoint = self.checkpoints.checkpoint(&self.scope)?;
        let mut report = SyncReport {
            checkpoint,
            ..Default::default()
        };

        if head <= checkpoint {
            debug!(head, checkpoint, "Already synced");
            return Ok(report);
        }

        let mut cursor = if checkpoint == 0 {
            self.settings.creation_ledger
        } else {
            checkpoint + 1
        };
        info!(head, from = cursor, "Synchronizing ledgers");

        while head > cursor {
            let transactions = self.fetch_ledger(cursor).await?;
            let found = borrowers_in(&transactions, &self.scope.pool)?;
            if !found.is_empty() {
                let added = self.borrowers.upsert_borrowers(&self.scope, &found)?;
                info!(ledger = cursor, found = found.len(), added, "Borrow events");
                report.borrow_events += found.len();
                report.new_borrowers += added;
            }
            self.checkpoints.set_checkpoint(&self.scope, cursor)?;
            report.checkpoint = cursor;
            report.ledgers_processed += 1;

            cursor += 1;
            head = self.chain.latest_ledger().await?;
        }

        Ok(report)
    }

    async fn fetch_ledger(&self, ledger: u32) -> Result<Vec<LedgerTransaction>, SyncError> {
        let attempts = self.settings.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.archive.ledger_transactions(ledger).await {
                Ok(transactions) => return Ok(transactions),
                Err(ArchiveError::NotFound(_)) if attempt < attempts => {
                    warn!(ledger, attempt, "Ledger not in archive yet, retrying");
                    self.delay.sleep(self.settings.retry_delay).await;
                    attempt += 1;
                }
                Err(ArchiveError::NotFound(_)) => {
                    return Err(SyncError::ArchiveExhausted { ledger, attempts })
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

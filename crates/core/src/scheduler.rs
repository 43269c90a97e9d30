//! Keeper control loop.
//!
//! A pass is a ledger sync followed by a liquidation pass. Passes never
//! overlap; between them the keeper waits on the injected [`Delay`] while
//! watching the shutdown signal.

use crate::liquidator::{LiquidationEngine, PassReport};
use crate::store::StoreError;
use crate::sync::{LedgerSynchronizer, SyncError, SyncReport};
use keeper_chain::Delay;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("ledger sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("liquidation pass failed: {0}")]
    Store(#[from] StoreError),
}

/// What one full pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperPass {
    pub sync: SyncReport,
    pub liquidation: PassReport,
}

#[derive(Debug)]
pub struct Keeper {
    synchronizer: LedgerSynchronizer,
    engine: LiquidationEngine,
    delay: Arc<dyn Delay>,
    pass_interval: Duration,
}

impl Keeper {
    pub fn new(
        synchronizer: LedgerSynchronizer,
        engine: LiquidationEngine,
        delay: Arc<dyn Delay>,
    ) -> Self {
        Self {
            synchronizer,
            engine,
            delay,
            pass_interval: Duration::from_secs(1),
        }
    }

    pub fn with_pass_interval(mut self, interval: Duration) -> Self {
        self.pass_interval = interval;
        self
    }

    /// Sync, then decide and execute.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> Result<KeeperPass, KeeperError> {
        let sync = self.synchronizer.sync().await?;
        let liquidation = self.engine.run_pass().await?;
        Ok(KeeperPass { sync, liquidation })
    }

    /// Run exactly `n` passes, waiting the pass interval between them.
    pub async fn run_passes(&self, n: usize) -> Result<Vec<KeeperPass>, KeeperError> {
        let mut passes = Vec::with_capacity(n);
        for i in 0..n {
            if i > 0 {
                self.delay.sleep(self.pass_interval).await;
            }
            passes.push(self.run_pass().await?);
        }
        Ok(passes)
    }

    /// Run passes until `shutdown` turns true or its sender is dropped.
    ///
    /// Returns the number of completed passes. A fatal error ends the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<u64, KeeperError> {
        let mut completed = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let pass = self.run_pass().await?;
            completed += 1;
            let liquidated = pass.liquidation.liquidated();
            if pass.sync.ledgers_processed > 0 || !liquidated.is_empty() {
                info!(
                    pass = completed,
                    checkpoint = pass.sync.checkpoint,
                    ledgers = pass.sync.ledgers_processed,
                    liquidated = liquidated.len(),
                    "Pass finished"
                );
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.delay.sleep(self.pass_interval) => {}
            }
        }
        info!(passes = completed, "Keeper stopped");
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BorrowerStore, CheckpointStore, MemoryStore, Scope};
    use crate::sync::SyncSettings;
    use keeper_chain::testing::{
        event_transaction, FakeArchive, FakeChain, FakeWriter, RecordingDelay,
    };
    use keeper_chain::{PoolLiquidator, PoolReader, POOL_PRECISION_FACTOR};

    const POOL: &str = "CAAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQC526";
    const ASSET: &str = "CAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAABSC4";
    const DEBT_TOKEN: &str = "CABAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAFNSZ";
    const KEEPER: &str = "GA5WUJ54Z23KILLCUOUNAKTPBVZWKMQVO4O6EQ5GHLAERIMLLHNCSKYH";
    const BORROWER: &str = "GADQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOZPI";

    struct Fixture {
        chain: FakeChain,
        archive: FakeArchive,
        writer: FakeWriter,
        store: Arc<MemoryStore>,
        delay: RecordingDelay,
        keeper: Keeper,
    }

    fn scope() -> Scope {
        Scope::new("testnet", POOL)
    }

    fn fixture() -> Fixture {
        let chain = FakeChain::new();
        let archive = FakeArchive::new();
        let writer = FakeWriter::new(KEEPER);
        let store = Arc::new(MemoryStore::new());
        let delay = RecordingDelay::default();

        chain.set_reserve(ASSET, "Fungible", DEBT_TOKEN);
        chain.set_coefficient(ASSET, POOL_PRECISION_FACTOR);
        chain.set_balance(ASSET, KEEPER, 1_000);

        let synchronizer = LedgerSynchronizer::new(
            Arc::new(chain.clone()),
            Arc::new(archive.clone()),
            store.clone(),
            store.clone(),
            Arc::new(delay.clone()),
            scope(),
        )
        .with_settings(SyncSettings {
            creation_ledger: 1,
            ..Default::default()
        });
        let engine = LiquidationEngine::new(
            PoolReader::new(Arc::new(chain.clone()), POOL),
            PoolLiquidator::new(Arc::new(writer.clone()), POOL),
            store.clone(),
            scope(),
        )
        .with_assets(vec![ASSET.to_string()]);
        let keeper = Keeper::new(synchronizer, engine, Arc::new(delay.clone()))
            .with_pass_interval(Duration::from_millis(500));

        Fixture {
            chain,
            archive,
            writer,
            store,
            delay,
            keeper,
        }
    }

    #[tokio::test]
    async fn test_sync_then_liquidate() {
        let f = fixture();
        f.chain.set_latest_ledger(4);
        f.archive
            .add_transaction(event_transaction(2, POOL, "borrow", BORROWER));
        f.chain.set_position(BORROWER, -3, 300, 297);
        f.chain.set_balance(DEBT_TOKEN, BORROWER, 300);

        let pass = f.keeper.run_pass().await.unwrap();

        assert_eq!(pass.sync.checkpoint, 3);
        assert_eq!(pass.liquidation.liquidated(), vec![BORROWER.to_string()]);
        assert_eq!(f.writer.liquidated(), vec![BORROWER]);
        assert!(f.store.borrowers(&scope()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_passes_waits_between_passes() {
        let f = fixture();
        f.chain.set_latest_ledger(2);

        let passes = f.keeper.run_passes(3).await.unwrap();

        assert_eq!(passes.len(), 3);
        assert_eq!(passes[0].sync.ledgers_processed, 1);
        assert_eq!(passes[1].sync.ledgers_processed, 0);
        assert_eq!(f.delay.slept(), vec![Duration::from_millis(500); 2]);
    }

    #[tokio::test]
    async fn test_fatal_sync_error_stops_passes() {
        let f = fixture();
        f.chain.set_latest_ledger(3);
        f.archive.fail(2);

        let err = f.keeper.run_passes(2).await.unwrap_err();
        assert!(matches!(err, KeeperError::Sync(_)));
        assert_eq!(f.store.checkpoint(&scope()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_honours_shutdown_before_first_pass() {
        let f = fixture();
        let (_tx, rx) = watch::channel(true);

        assert_eq!(f.keeper.run(rx).await.unwrap(), 0);
        assert!(f.archive.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_signal_sender_dropped() {
        let f = fixture();
        f.chain.set_latest_ledger(2);
        let (tx, rx) = watch::channel(false);
        drop(tx);

        assert_eq!(f.keeper.run(rx).await.unwrap(), 1);
        assert_eq!(f.store.checkpoint(&scope()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let f = fixture();
        f.chain.set_latest_ledger(2);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        // Already flagged before the loop starts.
        assert_eq!(f.keeper.run(rx).await.unwrap(), 0);
    }
}

//! Liquidation decision and execution.
//!
//! One pass reads every tracked borrower's position, drops borrowers without
//! debt, and then walks the pool's reserves in listing order, liquidating
//! undercollateralized borrowers while the keeper's balance of the reserve
//! asset covers their whole compounded debt. Liquidations are never partial:
//! the first borrower the remaining budget cannot cover ends the reserve.

use crate::position::{BorrowerPosition, PositionStatus};
use crate::store::{BorrowerStore, Scope, StoreError};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use keeper_chain::{PoolLiquidator, PoolReader, Reserve};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How a reserve's part of the pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Every candidate was considered.
    Completed,
    /// The remaining budget could not cover the next borrower.
    BudgetExhausted,
    /// Budget or debt coefficient could not be read.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveReport {
    pub asset: String,
    pub outcome: ReserveOutcome,
    /// Borrowers liquidated against this reserve, in order
    pub liquidated: Vec<String>,
    /// Budget left at the end, `None` when it was never read
    pub remaining_budget: Option<i128>,
}

/// Summary of one decide-and-execute pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub tracked: usize,
    pub read_failures: usize,
    pub stale_removed: usize,
    pub candidates: usize,
    pub reserves: Vec<ReserveReport>,
    pub submission_failures: usize,
}

impl PassReport {
    /// All borrowers liquidated this pass.
    pub fn liquidated(&self) -> Vec<String> {
        self.reserves
            .iter()
            .flat_map(|r| r.liquidated.iter().cloned())
            .collect()
    }
}

#[derive(Debug)]
pub struct LiquidationEngine {
    reader: PoolReader,
    liquidator: PoolLiquidator,
    borrowers: Arc<dyn BorrowerStore>,
    scope: Scope,
    /// Reserve assets to consider; empty means discover them every pass
    assets: Vec<String>,
    max_concurrent_reads: usize,
}

impl LiquidationEngine {
    pub fn new(
        reader: PoolReader,
        liquidator: PoolLiquidator,
        borrowers: Arc<dyn BorrowerStore>,
        scope: Scope,
    ) -> Self {
        Self {
            reader,
            liquidator,
            borrowers,
            scope,
            assets: Vec::new(),
            max_concurrent_reads: 16,
        }
    }

    /// Restrict the pass to these reserve assets.
    pub fn with_assets(mut self, assets: Vec<String>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_max_concurrent_reads(mut self, n: usize) -> Self {
        self.max_concurrent_reads = n.max(1);
        self
    }

    /// Run one pass. Only store failures abort it.
    #[instrument(skip(self), fields(scope = %self.scope))]
    pub async fn run_pass(&self) -> Result<PassReport, StoreError> {
        let borrowers = self.borrowers.borrowers(&self.scope)?;
        let mut report = PassReport {
            tracked: borrowers.len(),
            ..Default::default()
        };
        if borrowers.is_empty() {
            debug!("No tracked borrowers");
            return Ok(report);
        }

        let positions = self.read_positions(borrowers).await;
        let mut candidates = Vec::new();
        for (borrower, result) in positions {
            let position = match result {
                Ok(position) => BorrowerPosition { borrower, position },
                Err(e) => {
                    warn!(borrower = %borrower, error = %e, "Failed to read position");
                    report.read_failures += 1;
                    continue;
                }
            };
            match position.status() {
                PositionStatus::Stale => {
                    self.borrowers.remove_borrower(&self.scope, &position.borrower)?;
                    debug!(borrower = %position.borrower, "Removed borrower without debt");
                    report.stale_removed += 1;
                }
                PositionStatus::Candidate => {
                    info!(
                        borrower = %position.borrower,
                        npv = %position.position.npv,
                        debt = %position.position.debt,
                        "Liquidation candidate"
                    );
                    candidates.push(position.borrower);
                }
                PositionStatus::Healthy => {}
            }
        }
        report.candidates = candidates.len();
        if candidates.is_empty() {
            return Ok(report);
        }

        let reserves = self.reserves().await;
        let budgets = join_all(reserves.iter().map(|r| self.reserve_inputs(r))).await;

        let mut liquidated = HashSet::new();
        for (reserve, inputs) in reserves.iter().zip(budgets) {
            let reserve_report = match inputs {
                Some((budget, coefficient)) => {
                    self.liquidate_reserve(
                        reserve,
                        budget,
                        coefficient,
                        &candidates,
                        &mut liquidated,
                        &mut report.submission_failures,
                    )
                    .await?
                }
                None => ReserveReport {
                    asset: reserve.asset.clone(),
                    outcome: ReserveOutcome::Skipped,
                    liquidated: Vec::new(),
                    remaining_budget: None,
                },
            };
            report.reserves.push(reserve_report);
        }

        info!(
            tracked = report.tracked,
            candidates = report.candidates,
            liquidated = liquidated.len(),
            stale_removed = report.stale_removed,
            "Liquidation pass complete"
        );
        Ok(report)
    }

    async fn read_positions(
        &self,
        borrowers: Vec<String>,
    ) -> Vec<(String, Result<keeper_chain::AccountPosition, keeper_chain::ReadError>)> {
        stream::iter(borrowers)
            .map(|borrower| async move {
                let result = self.reader.account_position(&borrower).await;
                (borrower, result)
            })
            .buffered(self.max_concurrent_reads)
            .collect()
            .await
    }

    async fn reserves(&self) -> Vec<Reserve> {
        if !self.assets.is_empty() {
            return self.reader.list_reserves(&self.assets).await;
        }
        match self.reader.discover_assets().await {
            Ok(assets) => self.reader.list_reserves(&assets).await,
            Err(e) => {
                warn!(error = %e, "Failed to discover reserve assets");
                Vec::new()
            }
        }
    }

    /// Keeper budget and debt coefficient of a reserve.
    async fn reserve_inputs(&self, reserve: &Reserve) -> Option<(i128, i128)> {
        let (budget, coefficient) = futures::join!(
            self.reader.balance(&reserve.asset, self.liquidator.keeper()),
            self.reader.debt_coefficient(&reserve.asset),
        );
        match (budget, coefficient) {
            (Ok(budget), Ok(coefficient)) => Some((budget, coefficient)),
            (Err(e), _) | (_, Err(e)) => {
                warn!(asset = %reserve.asset, error = %e, "Skipping reserve this pass");
                None
            }
        }
    }

    #[instrument(skip(self, candidates, liquidated, submission_failures), fields(asset = %reserve.asset))]
    async fn liquidate_reserve(
        &self,
        reserve: &Reserve,
        mut budget: i128,
        coefficient: i128,
        candidates: &[String],
        liquidated: &mut HashSet<String>,
        submission_failures: &mut usize,
    ) -> Result<ReserveReport, StoreError> {
        let mut report = ReserveReport {
            asset: reserve.asset.clone(),
            outcome: ReserveOutcome::Completed,
            liquidated: Vec::new(),
            remaining_budget: Some(budget),
        };
        debug!(budget = %budget, coefficient = %coefficient, "Reserve budget");

        for borrower in candidates {
            if liquidated.contains(borrower) {
                continue;
            }
            let owed = match self
                .reader
                .compounded_debt(borrower, &reserve.debt_token, coefficient)
                .await
            {
                Ok(owed) => owed,
                Err(e) => {
                    warn!(borrower = %borrower, error = %e, "Failed to read debt");
                    continue;
                }
            };
            if budget < owed {
                info!(borrower = %borrower, owed = %owed, budget = %budget, "Budget exhausted");
                report.outcome = ReserveOutcome::BudgetExhausted;
                break;
            }

            match self.liquidator.liquidate(borrower).await {
                Ok(hash) => {
                    budget -= owed;
                    info!(borrower = %borrower, owed = %owed, tx = %hash, "Liquidated");
                    self.borrowers.remove_borrower(&self.scope, borrower)?;
                    liquidated.insert(borrower.clone());
                    report.liquidated.push(borrower.clone());
                    if budget <= 0 {
                        report.outcome = ReserveOutcome::BudgetExhausted;
                        break;
                    }
                }
                Err(e) => {
                    warn!(borrower = %borrower, owed = %owed, error = %e, "Liquidation failed");
                    *submission_failures += 1;
                }
            }
        }

        report.remaining_budget = Some(budget);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use keeper_chain::testing::{FakeChain, FakeWriter};
    use keeper_chain::POOL_PRECISION_FACTOR;

    const POOL: &str = "CAAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQC526";
    const ASSET: &str = "CAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAABSC4";
    const DEBT_TOKEN: &str = "CABAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAFNSZ";
    const KEEPER: &str = "GA5WUJ54Z23KILLCUOUNAKTPBVZWKMQVO4O6EQ5GHLAERIMLLHNCSKYH";
    const A: &str = "GAAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQDZ7H";
    const B: &str = "GABQGAYDAMBQGAYDAMBQGAYDAMBQGAYDAMBQGAYDAMBQGAYDAMBQHGPC";
    const C: &str = "GACAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAJJHP";
    const D: &str = "GACQKBIFAUCQKBIFAUCQKBIFAUCQKBIFAUCQKBIFAUCQKBIFAUCQKG7N";

    struct Fixture {
        chain: FakeChain,
        writer: FakeWriter,
        store: Arc<MemoryStore>,
        engine: LiquidationEngine,
    }

    fn scope() -> Scope {
        Scope::new("testnet", POOL)
    }

    fn fixture(budget: i128) -> Fixture {
        let chain = FakeChain::new();
        chain.set_reserve(ASSET, "Fungible", DEBT_TOKEN);
        chain.set_coefficient(ASSET, POOL_PRECISION_FACTOR);
        chain.set_balance(ASSET, KEEPER, budget);
        let writer = FakeWriter::new(KEEPER);
        let store = Arc::new(MemoryStore::new());
        let engine = LiquidationEngine::new(
            PoolReader::new(Arc::new(chain.clone()), POOL),
            PoolLiquidator::new(Arc::new(writer.clone()), POOL),
            store.clone(),
            scope(),
        )
        .with_assets(vec![ASSET.to_string()]);
        Fixture {
            chain,
            writer,
            store,
            engine,
        }
    }

    impl Fixture {
        /// Track an undercollateralized borrower owing `owed` at coefficient 1.
        fn candidate(&self, borrower: &str, owed: i128) {
            self.chain.set_position(borrower, -1, owed.max(1), 0);
            self.chain.set_balance(DEBT_TOKEN, borrower, owed);
            self.store
                .upsert_borrowers(&scope(), &[borrower.to_string()])
                .unwrap();
        }

        fn tracked(&self) -> Vec<String> {
            self.store.borrowers(&scope()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_greedy_short_circuit() {
        let f = fixture(100);
        f.candidate(A, 40);
        f.candidate(B, 50);
        f.candidate(C, 30);

        let report = f.engine.run_pass().await.unwrap();

        assert_eq!(f.writer.liquidated(), vec![A, B]);
        let reserve = &report.reserves[0];
        assert_eq!(reserve.outcome, ReserveOutcome::BudgetExhausted);
        assert_eq!(reserve.remaining_budget, Some(10));
        assert_eq!(f.tracked(), vec![C.to_string()]);
        // C's debt was read once, then the reserve stopped.
        assert_eq!(f.chain.call_count("balance"), 4);
    }

    #[tokio::test]
    async fn test_budget_never_goes_negative() {
        let f = fixture(70);
        f.candidate(A, 80);
        f.candidate(B, 20);

        let report = f.engine.run_pass().await.unwrap();

        // A is unaffordable, which ends the reserve before B.
        assert!(f.writer.liquidated().is_empty());
        assert_eq!(report.reserves[0].remaining_budget, Some(70));
        assert_eq!(report.reserves[0].outcome, ReserveOutcome::BudgetExhausted);
    }

    #[tokio::test]
    async fn test_exact_budget_stops_after_deduction() {
        let f = fixture(40);
        f.candidate(A, 40);
        f.candidate(B, 1);

        let report = f.engine.run_pass().await.unwrap();
        assert_eq!(f.writer.liquidated(), vec![A]);
        assert_eq!(report.reserves[0].remaining_budget, Some(0));
        assert_eq!(report.reserves[0].outcome, ReserveOutcome::BudgetExhausted);
    }

    #[tokio::test]
    async fn test_stale_borrower_removed() {
        let f = fixture(100);
        f.chain.set_position(A, 0, 0, 0);
        f.chain.set_position(B, 10, 5, 15);
        f.store
            .upsert_borrowers(&scope(), &[A.to_string(), B.to_string()])
            .unwrap();

        let report = f.engine.run_pass().await.unwrap();

        assert_eq!(report.stale_removed, 1);
        assert_eq!(report.candidates, 0);
        assert!(report.reserves.is_empty());
        assert_eq!(f.tracked(), vec![B.to_string()]);
        assert!(f.writer.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_submission_failure_keeps_budget_and_borrower() {
        let f = fixture(100);
        f.candidate(A, 60);
        f.candidate(B, 40);
        f.writer.fail_for(A);

        let report = f.engine.run_pass().await.unwrap();

        assert_eq!(f.writer.liquidated(), vec![B]);
        assert_eq!(report.submission_failures, 1);
        assert_eq!(report.reserves[0].remaining_budget, Some(60));
        assert_eq!(report.reserves[0].outcome, ReserveOutcome::Completed);
        assert_eq!(f.tracked(), vec![A.to_string()]);
    }

    #[tokio::test]
    async fn test_position_read_failure_keeps_borrower() {
        let f = fixture(100);
        f.candidate(A, 10);
        f.candidate(B, 10);
        f.chain.fail("account_position", A);

        let report = f.engine.run_pass().await.unwrap();

        assert_eq!(report.read_failures, 1);
        assert_eq!(f.writer.liquidated(), vec![B]);
        assert_eq!(f.tracked(), vec![A.to_string()]);
    }

    #[tokio::test]
    async fn test_zero_owed_is_submitted_with_zero_budget() {
        let f = fixture(0);
        // Debt lives in another reserve: nothing owed in this one.
        f.candidate(A, 0);
        f.chain.set_position(A, -5, 10, 0);

        let report = f.engine.run_pass().await.unwrap();
        assert_eq!(f.writer.liquidated(), vec![A]);
        assert_eq!(f.writer.submitted().len(), 1);
        assert_eq!(report.reserves[0].remaining_budget, Some(0));
        assert_eq!(report.reserves[0].outcome, ReserveOutcome::BudgetExhausted);
        assert!(f.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_zero_owed_costs_no_budget() {
        let f = fixture(100);
        f.candidate(A, 0);
        f.chain.set_position(A, -5, 10, 0);
        f.candidate(B, 30);

        let report = f.engine.run_pass().await.unwrap();
        assert_eq!(f.writer.liquidated(), vec![A, B]);
        assert_eq!(report.reserves[0].remaining_budget, Some(70));
    }

    #[tokio::test]
    async fn test_unreadable_reserve_is_skipped() {
        let f = fixture(100);
        f.candidate(A, 10);
        f.chain.fail("debt_coeff", ASSET);

        let report = f.engine.run_pass().await.unwrap();
        assert_eq!(report.reserves[0].outcome, ReserveOutcome::Skipped);
        assert!(f.writer.submitted().is_empty());
        assert_eq!(f.tracked(), vec![A.to_string()]);
    }

    #[tokio::test]
    async fn test_compounded_debt_uses_coefficient() {
        let f = fixture(2_000);
        f.chain.set_coefficient(ASSET, 2_000_000_000);
        f.chain.set_position(D, -1, 2_000, 0);
        f.chain.set_balance(DEBT_TOKEN, D, 1_000);
        f.store.upsert_borrowers(&scope(), &[D.to_string()]).unwrap();

        let report = f.engine.run_pass().await.unwrap();
        assert_eq!(f.writer.liquidated(), vec![D]);
        assert_eq!(report.reserves[0].remaining_budget, Some(0));
    }

    #[tokio::test]
    async fn test_discovers_assets_when_unconfigured() {
        use keeper_chain::NativeValue;

        let f = fixture(100);
        f.chain.set_instance_storage(vec![(
            NativeValue::Vec(vec![
                NativeValue::Text("ReserveAssetKey".into()),
                NativeValue::Address(ASSET.into()),
            ]),
            NativeValue::Bool(true),
        )]);
        f.candidate(A, 25);
        let engine = LiquidationEngine::new(
            PoolReader::new(Arc::new(f.chain.clone()), POOL),
            PoolLiquidator::new(Arc::new(f.writer.clone()), POOL),
            f.store.clone(),
            scope(),
        );

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.reserves.len(), 1);
        assert_eq!(report.liquidated(), vec![A.to_string()]);
    }
}

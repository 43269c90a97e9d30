//! Slender keeper core logic.
//!
//! This crate provides:
//! - Configuration loading (TOML, `${VAR}` expansion, environment overrides)
//! - Persistent checkpoint and borrower stores scoped by chain and pool
//! - The ledger synchronizer that discovers borrowers from `borrow` events
//! - Position classification and the greedy per-reserve liquidation engine
//! - The control loop driving sync and liquidation passes

pub mod config;
mod liquidator;
mod position;
mod scheduler;
pub mod store;
mod sync;

pub use keeper_chain::{Delay, TokioDelay};
pub use config::KeeperConfig;
pub use liquidator::{LiquidationEngine, PassReport, ReserveOutcome, ReserveReport};
pub use position::{BorrowerPosition, PositionStatus};
pub use scheduler::{Keeper, KeeperError, KeeperPass};
pub use store::{BorrowerStore, CheckpointStore, JsonFileStore, MemoryStore, Scope, StoreError};
pub use sync::{borrowers_in, LedgerSynchronizer, SyncError, SyncReport, SyncSettings};

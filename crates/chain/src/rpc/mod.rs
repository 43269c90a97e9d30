//! Soroban RPC access.
//!
//! The keeper talks to the chain through three seams:
//! - [`ChainReader`] for the ledger head, instance storage and simulated calls
//! - [`ChainWriter`] for signed, finality-polled contract calls
//! - [`ArchiveReader`] for the contract events of a historical ledger
//!
//! [`SorobanRpcClient`] and [`ArchiveClient`] are the JSON-RPC backed
//! implementations; tests substitute in-memory fakes.

mod archive;
mod client;
mod transport;
mod types;

use crate::codec::{DecodeError, NativeValue};
use crate::ledger::ContractEvent;
use crate::scval::{ScVal, XdrError};
use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

pub use archive::ArchiveClient;
pub use client::{SorobanRpcClient, SubmissionSettings};
pub use transport::RpcError;

/// Hex-encoded transaction hash.
pub type TxHash = String;

/// Failure of a single read.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("simulation failed: {0}")]
    Simulation(String),

    #[error("contract storage expired and must be restored")]
    StorageExpired,

    #[error("ledger entry not found")]
    NotFound,

    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("xdr: {0}")]
    Xdr(#[from] XdrError),

    #[error("unexpected result: {0}")]
    UnexpectedResult(String),
}

/// Failure to land a transaction.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("preparing transaction: {0}")]
    Prepare(#[from] ReadError),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("transaction {hash} failed on chain")]
    Failed { hash: TxHash },

    #[error("transaction {hash} not final after {attempts} polls")]
    Timeout { hash: TxHash, attempts: u32 },
}

impl From<RpcError> for SubmissionError {
    fn from(e: RpcError) -> Self {
        Self::Prepare(ReadError::Rpc(e))
    }
}

impl From<XdrError> for SubmissionError {
    fn from(e: XdrError) -> Self {
        Self::Prepare(ReadError::Xdr(e))
    }
}

/// Failure to fetch a ledger's transactions.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The ledger is not (yet) available from the archive.
    #[error("ledger {0} not found in archive")]
    NotFound(u32),

    /// An event of the transaction could not be parsed.
    #[error("malformed event in transaction {tx}: {reason}")]
    Malformed { tx: TxHash, reason: String },

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// A transaction applied in a ledger, with its contract events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub hash: TxHash,
    pub ledger: u32,
    pub successful: bool,
    pub events: Vec<ContractEvent>,
}

#[async_trait]
pub trait ChainReader: Send + Sync + Debug {
    /// Sequence of the newest closed ledger.
    async fn latest_ledger(&self) -> Result<u32, ReadError>;

    /// Decoded instance storage of a contract.
    async fn contract_instance_storage(
        &self,
        contract: &str,
    ) -> Result<Vec<(NativeValue, NativeValue)>, ReadError>;

    /// Simulate `contract.method(args)` and decode its return value.
    async fn simulate(
        &self,
        contract: &str,
        method: &str,
        args: Vec<ScVal>,
    ) -> Result<NativeValue, ReadError>;
}

#[async_trait]
pub trait ChainWriter: Send + Sync + Debug {
    /// Account the writer signs as.
    fn keeper_address(&self) -> &str;

    /// Sign and submit `contract.method(args)`, returning once it is final.
    async fn submit(
        &self,
        contract: &str,
        method: &str,
        args: Vec<ScVal>,
    ) -> Result<TxHash, SubmissionError>;
}

#[async_trait]
pub trait ArchiveReader: Send + Sync + Debug {
    /// All transactions applied in `ledger`, in application order.
    async fn ledger_transactions(&self, ledger: u32)
        -> Result<Vec<LedgerTransaction>, ArchiveError>;
}

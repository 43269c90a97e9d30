//! Slender keeper chain interaction layer.
//!
//! This crate provides:
//! - Contract value constructors over the `stellar-xdr` types
//! - The generic value codec with lossless wide-integer reconstruction
//! - The keeper keypair and transaction envelopes for contract invocations
//! - Soroban JSON-RPC clients behind the `ChainReader`, `ChainWriter` and
//!   `ArchiveReader` traits
//! - Typed reads of the lending pool (reserves, positions, balances)

pub mod clock;
pub mod codec;
pub mod ledger;
pub mod pool;
pub mod rpc;
pub mod scval;
mod signer;
pub mod transaction;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Delay, TokioDelay};
pub use codec::{decode, decode_base64, decode_xdr, DecodeError, NativeValue};
pub use pool::{AccountPosition, PoolLiquidator, PoolReader, Reserve, POOL_PRECISION_FACTOR};
pub use rpc::{
    ArchiveClient, ArchiveError, ArchiveReader, ChainReader, ChainWriter, LedgerTransaction,
    ReadError, SorobanRpcClient, SubmissionError, SubmissionSettings, TxHash,
};
pub use scval::{ScAddress, ScVal};
pub use signer::Keypair;

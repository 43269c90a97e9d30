//! Soroban RPC client: simulated reads and signed submissions.

use super::transport::{JsonRpc, RpcError};
use super::types::{
    GetLedgerEntriesParams, GetLedgerEntriesResponse, GetTransactionResponse, HashParams,
    LatestLedgerResponse, SendTransactionResponse, SimulateTransactionResponse,
    TransactionParams,
};
use super::{ChainReader, ChainWriter, ReadError, SubmissionError, TxHash};
use crate::clock::{Delay, TokioDelay};
use crate::codec::{self, NativeValue};
use crate::ledger::{self, LedgerEntryData, LedgerKey};
use crate::scval::{self, ScVal, READ_LIMITS};
use crate::signer::Keypair;
use crate::transaction::{contract_call, hash_hex, InvokeTransaction};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use stellar_xdr::curr::{
    InvokeContractArgs, Limits, ReadXdr, SorobanAuthorizationEntry, SorobanTransactionData,
    WriteXdr,
};
use tracing::{debug, info, instrument, warn};

/// Fee and finality polling for submissions.
#[derive(Debug, Clone)]
pub struct SubmissionSettings {
    /// Inclusion fee in stroops, before the simulated resource fee.
    pub base_fee: u32,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            base_fee: 100,
            poll_attempts: 15,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// JSON-RPC backed [`ChainReader`] and [`ChainWriter`].
///
/// Simulations use the keeper account as transaction source, so the client
/// always carries the keypair.
#[derive(Debug)]
pub struct SorobanRpcClient {
    rpc: JsonRpc,
    network_passphrase: String,
    keypair: Keypair,
    address: String,
    settings: SubmissionSettings,
    delay: Arc<dyn Delay>,
}

impl SorobanRpcClient {
    pub fn new(
        url: impl Into<String>,
        network_passphrase: impl Into<String>,
        keypair: Keypair,
    ) -> Result<Self, RpcError> {
        let rpc = JsonRpc::new(url)?;
        info!(url = rpc.url(), keeper = %keypair.address(), "Soroban RPC client created");
        Ok(Self {
            rpc,
            network_passphrase: network_passphrase.into(),
            address: keypair.address(),
            keypair,
            settings: SubmissionSettings::default(),
            delay: Arc::new(TokioDelay),
        })
    }

    pub fn with_settings(mut self, settings: SubmissionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    fn contract_call(
        &self,
        contract: &str,
        method: &str,
        args: Vec<ScVal>,
    ) -> Result<InvokeContractArgs, ReadError> {
        let address = contract_address(contract)?;
        Ok(contract_call(address, method, args)?)
    }

    async fn simulate_raw(
        &self,
        tx: &InvokeTransaction,
    ) -> Result<SimulateTransactionResponse, ReadError> {
        let params = TransactionParams {
            transaction: tx.unsigned_envelope()?.to_xdr_base64(Limits::none())?,
        };
        let sim: SimulateTransactionResponse =
            self.rpc.call("simulateTransaction", params).await?;
        if let Some(error) = &sim.error {
            return Err(ReadError::Simulation(error.clone()));
        }
        if sim.restore_preamble.is_some() {
            return Err(ReadError::StorageExpired);
        }
        Ok(sim)
    }

    /// Current sequence number of the keeper account.
    async fn account_sequence(&self) -> Result<i64, ReadError> {
        let key = ledger::account_key(self.keypair.public_key());
        match self.ledger_entry(&key).await? {
            LedgerEntryData::Account(account) => Ok(account.seq_num.0),
            other => Err(ReadError::UnexpectedResult(format!(
                "expected account entry, got {}",
                other.name()
            ))),
        }
    }

    async fn ledger_entry(&self, key: &LedgerKey) -> Result<LedgerEntryData, ReadError> {
        let params = GetLedgerEntriesParams {
            keys: vec![key.to_xdr_base64(Limits::none())?],
        };
        let response: GetLedgerEntriesResponse = self.rpc.call("getLedgerEntries", params).await?;
        let entry = response
            .entries
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or(ReadError::NotFound)?;
        Ok(ledger::parse_entry(&entry.xdr)?)
    }
}

/// Where the finality poll reads a submitted transaction's status from.
#[async_trait]
pub(crate) trait TransactionStatusSource: Send + Sync {
    async fn transaction_status(&self, hash: &str) -> Result<String, RpcError>;
}

#[async_trait]
impl TransactionStatusSource for JsonRpc {
    async fn transaction_status(&self, hash: &str) -> Result<String, RpcError> {
        let response: GetTransactionResponse = self
            .call(
                "getTransaction",
                HashParams {
                    hash: hash.to_string(),
                },
            )
            .await?;
        Ok(response.status)
    }
}

/// Poll `hash` until it is `SUCCESS` or `FAILED`, at most `poll_attempts`
/// times, waiting `poll_interval` between polls.
pub(crate) async fn await_finality(
    source: &dyn TransactionStatusSource,
    delay: &dyn Delay,
    settings: &SubmissionSettings,
    hash: &str,
) -> Result<(), SubmissionError> {
    let attempts = settings.poll_attempts;
    for attempt in 1..=attempts {
        match source.transaction_status(hash).await?.as_str() {
            "SUCCESS" => return Ok(()),
            "FAILED" => {
                return Err(SubmissionError::Failed {
                    hash: hash.to_string(),
                })
            }
            status => {
                debug!(hash, attempt, status, "Transaction not final yet");
                if attempt < attempts {
                    delay.sleep(settings.poll_interval).await;
                }
            }
        }
    }
    Err(SubmissionError::Timeout {
        hash: hash.to_string(),
        attempts,
    })
}

fn contract_address(contract: &str) -> Result<scval::ScAddress, ReadError> {
    scval::parse_address(contract).map_err(|e| ReadError::InvalidAddress {
        address: contract.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl ChainReader for SorobanRpcClient {
    async fn latest_ledger(&self) -> Result<u32, ReadError> {
        let latest: LatestLedgerResponse = self
            .rpc
            .call("getLatestLedger", serde_json::json!({}))
            .await?;
        Ok(latest.sequence)
    }

    async fn contract_instance_storage(
        &self,
        contract: &str,
    ) -> Result<Vec<(NativeValue, NativeValue)>, ReadError> {
        let key = ledger::contract_instance_key(contract_address(contract)?);
        let entry = self.ledger_entry(&key).await?;
        let LedgerEntryData::ContractData(data) = entry else {
            return Err(ReadError::UnexpectedResult(
                "expected contract data entry".to_string(),
            ));
        };
        let ScVal::ContractInstance(instance) = data.val else {
            return Err(ReadError::UnexpectedResult(
                "expected contract instance value".to_string(),
            ));
        };

        let mut storage = Vec::new();
        for entry in instance.storage.iter().flat_map(|map| map.0.iter()) {
            match (codec::decode(&entry.key), codec::decode(&entry.val)) {
                (Ok(k), Ok(v)) => storage.push((k, v)),
                (Err(e), _) | (_, Err(e)) => {
                    debug!(contract, error = %e, "Skipping undecodable instance entry");
                }
            }
        }
        Ok(storage)
    }

    async fn simulate(
        &self,
        contract: &str,
        method: &str,
        args: Vec<ScVal>,
    ) -> Result<NativeValue, ReadError> {
        let call = self.contract_call(contract, method, args)?;
        // Simulation does not check the sequence number.
        let tx = InvokeTransaction::new(self.keypair.public_key(), self.settings.base_fee, 0, call);
        let sim = self.simulate_raw(&tx).await?;
        let result = sim
            .results
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| ReadError::UnexpectedResult(format!("{method}: no result")))?;
        Ok(codec::decode_base64(&result.xdr)?)
    }
}

#[async_trait]
impl ChainWriter for SorobanRpcClient {
    fn keeper_address(&self) -> &str {
        &self.address
    }

    #[instrument(skip(self, args))]
    async fn submit(
        &self,
        contract: &str,
        method: &str,
        args: Vec<ScVal>,
    ) -> Result<TxHash, SubmissionError> {
        let call = self.contract_call(contract, method, args)?;
        let seq_num = self.account_sequence().await? + 1;
        let tx = InvokeTransaction::new(
            self.keypair.public_key(),
            self.settings.base_fee,
            seq_num,
            call,
        );

        let sim = self.simulate_raw(&tx).await?;
        let soroban_data = sim
            .transaction_data
            .as_deref()
            .ok_or_else(|| ReadError::UnexpectedResult("missing transaction data".to_string()))
            .and_then(|d| Ok(SorobanTransactionData::from_xdr_base64(d, READ_LIMITS)?))?;
        let auth = sim
            .results
            .and_then(|r| r.into_iter().next())
            .map(|r| r.auth)
            .unwrap_or_default()
            .iter()
            .map(|a| SorobanAuthorizationEntry::from_xdr_base64(a, READ_LIMITS))
            .collect::<Result<Vec<_>, _>>()?;
        let resource_fee = sim
            .min_resource_fee
            .as_deref()
            .unwrap_or("0")
            .parse::<u32>()
            .map_err(|e| ReadError::UnexpectedResult(format!("min resource fee: {e}")))?;

        let tx = tx.assemble(soroban_data, auth, resource_fee);
        let envelope = tx.sign(&self.keypair, &self.network_passphrase)?;
        let local_hash = hash_hex(&tx.hash(&self.network_passphrase)?);
        debug!(fee = tx.fee, seq_num, hash = %local_hash, "Sending transaction");

        let sent: SendTransactionResponse = self
            .rpc
            .call(
                "sendTransaction",
                TransactionParams {
                    transaction: envelope.to_xdr_base64(Limits::none())?,
                },
            )
            .await?;

        match sent.status.as_str() {
            "PENDING" | "DUPLICATE" => {}
            status => {
                warn!(hash = %sent.hash, status, "Transaction not accepted");
                return Err(SubmissionError::Rejected(format!(
                    "{status}: {}",
                    sent.error_result_xdr.unwrap_or_default()
                )));
            }
        }

        if !sent.hash.eq_ignore_ascii_case(&local_hash) {
            warn!(local = %local_hash, remote = %sent.hash, "Transaction hash mismatch");
        }
        await_finality(&self.rpc, self.delay.as_ref(), &self.settings, &sent.hash).await?;
        info!(hash = %sent.hash, "Transaction confirmed");
        Ok(sent.hash)
    }
}

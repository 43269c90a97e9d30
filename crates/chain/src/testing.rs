//! In-memory chain fakes for tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream crates' tests.

use crate::clock::Delay;
use crate::codec::{i256_from_i128, NativeValue};
use crate::ledger::{ContractEvent, ContractEventType};
use crate::rpc::{
    ArchiveError, ArchiveReader, ChainReader, ChainWriter, LedgerTransaction, ReadError,
    SubmissionError, TxHash,
};
use crate::scval::{self, ScAddress, ScVal};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use stellar_xdr::curr::{ContractEventBody, ContractEventV0, ExtensionPoint};

fn arg_address(args: &[ScVal], index: usize) -> Result<String, ReadError> {
    match args.get(index) {
        Some(ScVal::Address(a)) => Ok(a.to_string()),
        other => Err(ReadError::UnexpectedResult(format!(
            "expected address argument, got {other:?}"
        ))),
    }
}

fn int(v: i128) -> NativeValue {
    NativeValue::Int(i256_from_i128(v))
}

#[derive(Debug, Default)]
struct ChainState {
    latest_ledger: u32,
    instance_storage: Vec<(NativeValue, NativeValue)>,
    reserves: HashMap<String, NativeValue>,
    positions: HashMap<String, NativeValue>,
    balances: HashMap<(String, String), i128>,
    coefficients: HashMap<String, i128>,
    /// `(method, first address argument)` pairs that fail.
    failing: HashSet<(String, String)>,
    calls: Vec<(String, String)>,
}

/// Fake [`ChainReader`] answering pool and token reads from in-memory tables.
#[derive(Debug, Clone, Default)]
pub struct FakeChain {
    state: Arc<Mutex<ChainState>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest_ledger(&self, ledger: u32) {
        self.state.lock().latest_ledger = ledger;
    }

    pub fn set_instance_storage(&self, storage: Vec<(NativeValue, NativeValue)>) {
        self.state.lock().instance_storage = storage;
    }

    /// Reserve of `kind` (`"Fungible"`, `"Rwa"`) with the given debt token.
    pub fn set_reserve(&self, asset: &str, kind: &str, debt_token: &str) {
        let data = NativeValue::Map(vec![(
            NativeValue::Text("reserve_type".into()),
            NativeValue::Vec(vec![
                NativeValue::Text(kind.into()),
                NativeValue::Address(asset.into()),
                NativeValue::Address(debt_token.into()),
            ]),
        )]);
        self.state.lock().reserves.insert(asset.to_string(), data);
    }

    pub fn set_position(&self, user: &str, npv: i128, debt: i128, discounted_collateral: i128) {
        let data = NativeValue::Map(vec![
            (NativeValue::Text("debt".into()), int(debt)),
            (
                NativeValue::Text("discounted_collateral".into()),
                int(discounted_collateral),
            ),
            (NativeValue::Text("npv".into()), int(npv)),
        ]);
        self.state.lock().positions.insert(user.to_string(), data);
    }

    pub fn set_balance(&self, token: &str, holder: &str, amount: i128) {
        self.state
            .lock()
            .balances
            .insert((token.to_string(), holder.to_string()), amount);
    }

    pub fn set_coefficient(&self, asset: &str, coefficient: i128) {
        self.state
            .lock()
            .coefficients
            .insert(asset.to_string(), coefficient);
    }

    /// Make `method` fail whenever its first address argument is `address`.
    pub fn fail(&self, method: &str, address: &str) {
        self.state
            .lock()
            .failing
            .insert((method.to_string(), address.to_string()));
    }

    /// Number of simulated calls of `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn latest_ledger(&self) -> Result<u32, ReadError> {
        Ok(self.state.lock().latest_ledger)
    }

    async fn contract_instance_storage(
        &self,
        _contract: &str,
    ) -> Result<Vec<(NativeValue, NativeValue)>, ReadError> {
        Ok(self.state.lock().instance_storage.clone())
    }

    async fn simulate(
        &self,
        contract: &str,
        method: &str,
        args: Vec<ScVal>,
    ) -> Result<NativeValue, ReadError> {
        let address = arg_address(&args, 0)?;
        let mut state = self.state.lock();
        state.calls.push((method.to_string(), address.clone()));
        if state.failing.contains(&(method.to_string(), address.clone())) {
            return Err(ReadError::Simulation(format!("{method} failed for {address}")));
        }
        let missing = || ReadError::Simulation(format!("no {method} data for {address}"));
        match method {
            "get_reserve" => state.reserves.get(&address).cloned().ok_or_else(missing),
            "account_position" => state.positions.get(&address).cloned().ok_or_else(missing),
            "debt_coeff" => state
                .coefficients
                .get(&address)
                .map(|c| int(*c))
                .ok_or_else(missing),
            "balance" => Ok(int(state
                .balances
                .get(&(contract.to_string(), address.clone()))
                .copied()
                .unwrap_or(0))),
            _ => Err(missing()),
        }
    }
}

#[derive(Debug, Default)]
struct WriterState {
    submitted: Vec<(String, Vec<String>)>,
    failing: HashSet<String>,
}

/// Fake [`ChainWriter`] recording submissions.
#[derive(Debug, Clone)]
pub struct FakeWriter {
    keeper: String,
    state: Arc<Mutex<WriterState>>,
}

impl FakeWriter {
    pub fn new(keeper: impl Into<String>) -> Self {
        Self {
            keeper: keeper.into(),
            state: Arc::default(),
        }
    }

    /// Reject any submission whose last address argument is `borrower`.
    pub fn fail_for(&self, borrower: &str) {
        self.state.lock().failing.insert(borrower.to_string());
    }

    /// Successful submissions as `(method, address arguments)`.
    pub fn submitted(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().submitted.clone()
    }

    /// Borrowers successfully liquidated, in submission order.
    pub fn liquidated(&self) -> Vec<String> {
        self.submitted()
            .into_iter()
            .filter(|(m, _)| m == "liquidate")
            .filter_map(|(_, args)| args.last().cloned())
            .collect()
    }
}

#[async_trait]
impl ChainWriter for FakeWriter {
    fn keeper_address(&self) -> &str {
        &self.keeper
    }

    async fn submit(
        &self,
        _contract: &str,
        method: &str,
        args: Vec<ScVal>,
    ) -> Result<TxHash, SubmissionError> {
        let addresses = args
            .iter()
            .filter_map(|a| match a {
                ScVal::Address(a) => Some(a.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>();
        let mut state = self.state.lock();
        if let Some(target) = addresses.last() {
            if state.failing.contains(target) {
                return Err(SubmissionError::Rejected(format!("{method} rejected")));
            }
        }
        state.submitted.push((method.to_string(), addresses));
        Ok(format!("{:064x}", state.submitted.len()))
    }
}

#[derive(Debug, Default)]
struct ArchiveState {
    ledgers: HashMap<u32, Vec<LedgerTransaction>>,
    not_found: HashMap<u32, u32>,
    fail_transport: HashSet<u32>,
    fetched: Vec<u32>,
}

/// Fake [`ArchiveReader`]; unknown ledgers are empty.
#[derive(Debug, Clone, Default)]
pub struct FakeArchive {
    state: Arc<Mutex<ArchiveState>>,
}

impl FakeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&self, tx: LedgerTransaction) {
        self.state.lock().ledgers.entry(tx.ledger).or_default().push(tx);
    }

    /// Answer `NotFound` for the next `times` fetches of `ledger`.
    pub fn not_found(&self, ledger: u32, times: u32) {
        self.state.lock().not_found.insert(ledger, times);
    }

    /// Answer a transport error for every fetch of `ledger`.
    pub fn fail(&self, ledger: u32) {
        self.state.lock().fail_transport.insert(ledger);
    }

    /// Ledgers fetched so far, in order, including failed attempts.
    pub fn fetched(&self) -> Vec<u32> {
        self.state.lock().fetched.clone()
    }
}

#[async_trait]
impl ArchiveReader for FakeArchive {
    async fn ledger_transactions(
        &self,
        ledger: u32,
    ) -> Result<Vec<LedgerTransaction>, ArchiveError> {
        let mut state = self.state.lock();
        state.fetched.push(ledger);
        if state.fail_transport.contains(&ledger) {
            return Err(ArchiveError::Rpc(crate::rpc::RpcError::Transport(
                "connection reset".into(),
            )));
        }
        if let Some(remaining) = state.not_found.get_mut(&ledger) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ArchiveError::NotFound(ledger));
            }
        }
        Ok(state.ledgers.get(&ledger).cloned().unwrap_or_default())
    }
}

/// Contract event emitted by `contract`.
///
/// Panics when `contract` is not a contract strkey.
pub fn contract_event(contract: &str, topics: Vec<ScVal>, data: ScVal) -> ContractEvent {
    let contract_id = match scval::parse_address(contract) {
        Ok(ScAddress::Contract(id)) => id,
        other => panic!("not a contract address: {contract} ({other:?})"),
    };
    ContractEvent {
        ext: ExtensionPoint::V0,
        contract_id: Some(contract_id),
        type_: ContractEventType::Contract,
        body: ContractEventBody::V0(ContractEventV0 {
            topics: topics.try_into().expect("too many topics"),
            data,
        }),
    }
}

/// Successful transaction emitting one contract event with `topics`.
pub fn topics_transaction(ledger: u32, contract: &str, topics: Vec<ScVal>) -> LedgerTransaction {
    LedgerTransaction {
        hash: format!("{ledger:08x}{}", topics.len()),
        ledger,
        successful: true,
        events: vec![contract_event(contract, topics, scval::i128(1))],
    }
}

/// Successful transaction emitting `topic(borrower)` from `contract`.
pub fn event_transaction(
    ledger: u32,
    contract: &str,
    topic: &str,
    borrower: &str,
) -> LedgerTransaction {
    let topics = vec![
        scval::symbol(topic).expect("valid symbol"),
        scval::address(borrower).expect("valid address"),
    ];
    let mut tx = topics_transaction(ledger, contract, topics);
    tx.hash = format!("{ledger:08x}{topic}");
    tx
}

/// [`Delay`] that returns immediately and records every requested wait.
#[derive(Debug, Default, Clone)]
pub struct RecordingDelay {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingDelay {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

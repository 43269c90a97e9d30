//! Ledger keys and contract events.
//!
//! Thin accessors over the `stellar-xdr` types the keeper reads: account and
//! contract-instance keys for `getLedgerEntries`, and the contract / diagnostic
//! events attached to archived transactions.

use crate::scval::{ScAddress, ScVal, XdrError, READ_LIMITS};
use stellar_xdr::curr::{
    AccountId, ContractDataDurability, ContractEventBody, LedgerKeyAccount,
    LedgerKeyContractData, PublicKey, ReadXdr, Uint256,
};

pub use stellar_xdr::curr::{ContractEvent, ContractEventType, DiagnosticEvent, LedgerEntryData, LedgerKey};

/// Key of an account entry.
pub fn account_key(public_key: [u8; 32]) -> LedgerKey {
    LedgerKey::Account(LedgerKeyAccount {
        account_id: AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(public_key))),
    })
}

/// Key of a contract's instance entry, where its instance storage lives.
pub fn contract_instance_key(contract: ScAddress) -> LedgerKey {
    LedgerKey::ContractData(LedgerKeyContractData {
        contract,
        key: ScVal::LedgerKeyContractInstance,
        durability: ContractDataDurability::Persistent,
    })
}

/// Strkey of the emitting contract.
pub fn event_contract(event: &ContractEvent) -> Option<String> {
    event
        .contract_id
        .clone()
        .map(|id| ScAddress::Contract(id).to_string())
}

pub fn event_topics(event: &ContractEvent) -> &[ScVal] {
    match &event.body {
        ContractEventBody::V0(body) => body.topics.as_slice(),
    }
}

/// Parse a base64 `ContractEvent`.
pub fn parse_contract_event(encoded: &str) -> Result<ContractEvent, XdrError> {
    ContractEvent::from_xdr_base64(encoded, READ_LIMITS)
}

/// Parse a base64 `DiagnosticEvent`.
pub fn parse_diagnostic_event(encoded: &str) -> Result<DiagnosticEvent, XdrError> {
    DiagnosticEvent::from_xdr_base64(encoded, READ_LIMITS)
}

/// Parse a base64 `LedgerEntryData`, as returned in `getLedgerEntries`.
pub fn parse_entry(encoded: &str) -> Result<LedgerEntryData, XdrError> {
    LedgerEntryData::from_xdr_base64(encoded, READ_LIMITS)
}

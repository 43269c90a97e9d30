//! Wire types of the Soroban JSON-RPC methods the keeper calls.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a, P> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse<R> {
    pub result: Option<R>,
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LatestLedgerResponse {
    pub sequence: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct GetLedgerEntriesParams {
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetLedgerEntriesResponse {
    #[serde(default)]
    pub entries: Option<Vec<LedgerEntryResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LedgerEntryResult {
    /// Base64 `LedgerEntryData`
    pub xdr: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct TransactionParams {
    pub transaction: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SimulateTransactionResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub transaction_data: Option<String>,
    /// Stroops, sent as a decimal string.
    #[serde(default)]
    pub min_resource_fee: Option<String>,
    #[serde(default)]
    pub results: Option<Vec<SimulateHostFunctionResult>>,
    #[serde(default)]
    pub restore_preamble: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SimulateHostFunctionResult {
    #[serde(default)]
    pub auth: Vec<String>,
    pub xdr: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendTransactionResponse {
    pub status: String,
    pub hash: String,
    #[serde(default)]
    pub error_result_xdr: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct HashParams {
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetTransactionResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetTransactionsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_ledger: Option<u32>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub(crate) struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetTransactionsResponse {
    #[serde(default)]
    pub transactions: Vec<TransactionInfo>,
    pub latest_ledger: u32,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransactionInfo {
    pub status: String,
    pub ledger: u32,
    #[serde(default)]
    pub tx_hash: String,
    /// Newer servers: events grouped per operation.
    #[serde(default)]
    pub events: Option<TransactionEvents>,
    /// Older servers: flat diagnostic events.
    #[serde(default)]
    pub diagnostic_events_xdr: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransactionEvents {
    #[serde(default)]
    pub contract_events_xdr: Option<Vec<Vec<String>>>,
}

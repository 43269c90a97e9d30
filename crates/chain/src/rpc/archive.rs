//! Historical transactions of a single ledger via `getTransactions`.

use super::transport::{JsonRpc, RpcError};
use super::types::{GetTransactionsParams, GetTransactionsResponse, Pagination, TransactionInfo};
use super::{ArchiveError, ArchiveReader, LedgerTransaction};
use crate::ledger::{self, ContractEvent, ContractEventType};
use async_trait::async_trait;
use tracing::debug;

/// JSON-RPC backed [`ArchiveReader`].
#[derive(Debug)]
pub struct ArchiveClient {
    rpc: JsonRpc,
    page_limit: u32,
}

impl ArchiveClient {
    pub fn new(url: impl Into<String>, page_limit: u32) -> Result<Self, RpcError> {
        Ok(Self {
            rpc: JsonRpc::new(url)?,
            page_limit: page_limit.max(1),
        })
    }
}

/// One page of `getTransactions`.
///
/// The first page of a ledger starts at the ledger itself; later pages
/// continue from the previous page's cursor.
#[async_trait]
pub(crate) trait TransactionPages: Send + Sync {
    async fn page(
        &self,
        ledger: u32,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<GetTransactionsResponse, ArchiveError>;
}

#[async_trait]
impl TransactionPages for JsonRpc {
    async fn page(
        &self,
        ledger: u32,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<GetTransactionsResponse, ArchiveError> {
        let params = GetTransactionsParams {
            start_ledger: cursor.is_none().then_some(ledger),
            pagination: Pagination { cursor, limit },
        };
        match self.call("getTransactions", params).await {
            Ok(page) => Ok(page),
            Err(RpcError::Response { message, .. }) if is_out_of_range(&message) => {
                Err(ArchiveError::NotFound(ledger))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// The server rejects start ledgers outside its retention window.
fn is_out_of_range(message: &str) -> bool {
    message.contains("must be between")
}

/// Contract events of a transaction, from whichever field the server fills.
///
/// An event that does not parse fails the whole transaction: skipping it
/// could lose a borrower for good once the ledger is checkpointed.
fn transaction_events(info: &TransactionInfo) -> Result<Vec<ContractEvent>, ArchiveError> {
    let malformed = |e: crate::scval::XdrError| ArchiveError::Malformed {
        tx: info.tx_hash.clone(),
        reason: e.to_string(),
    };

    if let Some(grouped) = info.events.as_ref().and_then(|e| e.contract_events_xdr.as_ref()) {
        return grouped
            .iter()
            .flatten()
            .map(|encoded| ledger::parse_contract_event(encoded).map_err(malformed))
            .collect();
    }

    let mut events = Vec::new();
    for encoded in info.diagnostic_events_xdr.iter().flatten() {
        let diag = ledger::parse_diagnostic_event(encoded).map_err(malformed)?;
        if diag.in_successful_contract_call && diag.event.type_ == ContractEventType::Contract {
            events.push(diag.event);
        }
    }
    Ok(events)
}

/// Walk pages from `ledger` until the ledger is complete.
///
/// Stops at the first transaction past `ledger`, on a short page, or when
/// the server returns no cursor.
pub(crate) async fn collect_ledger(
    pages: &dyn TransactionPages,
    ledger: u32,
    page_limit: u32,
) -> Result<Vec<LedgerTransaction>, ArchiveError> {
    let mut transactions = Vec::new();
    let mut cursor = None;

    loop {
        let page = pages.page(ledger, cursor, page_limit).await?;
        if ledger > page.latest_ledger {
            return Err(ArchiveError::NotFound(ledger));
        }

        let count = page.transactions.len();
        let mut passed_ledger = false;
        for info in &page.transactions {
            if info.ledger > ledger {
                passed_ledger = true;
                break;
            }
            if info.ledger == ledger {
                transactions.push(LedgerTransaction {
                    hash: info.tx_hash.clone(),
                    ledger,
                    successful: info.status == "SUCCESS",
                    events: transaction_events(info)?,
                });
            }
        }

        if passed_ledger || count < page_limit as usize || page.cursor.is_none() {
            break;
        }
        cursor = page.cursor;
    }

    debug!(ledger, count = transactions.len(), "Fetched ledger transactions");
    Ok(transactions)
}

#[async_trait]
impl ArchiveReader for ArchiveClient {
    async fn ledger_transactions(
        &self,
        ledger: u32,
    ) -> Result<Vec<LedgerTransaction>, ArchiveError> {
        collect_ledger(&self.rpc, ledger, self.page_limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::TransactionEvents;
    use crate::scval;
    use crate::testing::contract_event;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use stellar_xdr::curr::{DiagnosticEvent, Limits, WriteXdr};

    const POOL: &str = "CAAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQC526";
    const USER: &str = "GADQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOZPI";

    fn event() -> ContractEvent {
        contract_event(
            POOL,
            vec![scval::symbol("borrow").unwrap(), scval::address(USER).unwrap()],
            scval::i128(1),
        )
    }

    fn info(ledger: u32, hash: &str) -> TransactionInfo {
        TransactionInfo {
            status: "SUCCESS".into(),
            ledger,
            tx_hash: hash.into(),
            events: None,
            diagnostic_events_xdr: None,
        }
    }

    fn grouped(events: Vec<String>) -> Option<TransactionEvents> {
        Some(TransactionEvents {
            contract_events_xdr: Some(vec![events]),
        })
    }

    /// Pages keyed by the cursor that requests them.
    #[derive(Default)]
    struct ScriptedPages {
        pages: Mutex<HashMap<Option<String>, GetTransactionsResponse>>,
        requested: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedPages {
        fn with_page(self, cursor: Option<&str>, txs: Vec<TransactionInfo>, next: Option<&str>) -> Self {
            self.pages.lock().insert(
                cursor.map(String::from),
                GetTransactionsResponse {
                    transactions: txs,
                    latest_ledger: 100,
                    cursor: next.map(String::from),
                },
            );
            self
        }

        fn requested(&self) -> Vec<Option<String>> {
            self.requested.lock().clone()
        }
    }

    #[async_trait]
    impl TransactionPages for ScriptedPages {
        async fn page(
            &self,
            _ledger: u32,
            cursor: Option<String>,
            _limit: u32,
        ) -> Result<GetTransactionsResponse, ArchiveError> {
            self.requested.lock().push(cursor.clone());
            self.pages
                .lock()
                .remove(&cursor)
                .ok_or(ArchiveError::Rpc(RpcError::EmptyResponse))
        }
    }

    fn hashes(txs: &[LedgerTransaction]) -> Vec<&str> {
        txs.iter().map(|tx| tx.hash.as_str()).collect()
    }

    #[test]
    fn test_grouped_contract_events() {
        let mut tx = info(10, "ab");
        tx.events = grouped(vec![event().to_xdr_base64(Limits::none()).unwrap()]);
        assert_eq!(transaction_events(&tx).unwrap(), vec![event()]);
    }

    #[test]
    fn test_truncated_event_is_an_error() {
        let mut bytes = event().to_xdr(Limits::none()).unwrap();
        bytes.truncate(bytes.len() - 4);
        let mut tx = info(10, "ab");
        tx.events = grouped(vec![STANDARD.encode(bytes)]);

        let err = transaction_events(&tx).unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed { ref tx, .. } if tx == "ab"));

        let mut tx = info(10, "cd");
        tx.events = grouped(vec!["%%%".into()]);
        assert!(matches!(
            transaction_events(&tx),
            Err(ArchiveError::Malformed { .. })
        ));
    }

    #[test]
    fn test_diagnostic_events_filtered() {
        let wrap = |ok: bool, kind: ContractEventType| {
            let mut e = event();
            e.type_ = kind;
            DiagnosticEvent {
                in_successful_contract_call: ok,
                event: e,
            }
            .to_xdr_base64(Limits::none())
            .unwrap()
        };
        let mut tx = info(10, "ab");
        tx.diagnostic_events_xdr = Some(vec![
            wrap(true, ContractEventType::Contract),
            wrap(false, ContractEventType::Contract),
            wrap(true, ContractEventType::Diagnostic),
        ]);
        assert_eq!(transaction_events(&tx).unwrap(), vec![event()]);

        tx.diagnostic_events_xdr = Some(vec!["AAAA".into()]);
        assert!(transaction_events(&tx).is_err());
    }

    #[tokio::test]
    async fn test_walks_pages_until_ledger_passed() {
        let pages = ScriptedPages::default()
            .with_page(None, vec![info(10, "a"), info(10, "b")], Some("c1"))
            .with_page(Some("c1"), vec![info(10, "c"), info(10, "d")], Some("c2"))
            .with_page(Some("c2"), vec![info(10, "e"), info(11, "f")], Some("c3"));

        let txs = collect_ledger(&pages, 10, 2).await.unwrap();

        assert_eq!(hashes(&txs), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(
            pages.requested(),
            vec![None, Some("c1".to_string()), Some("c2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_short_page_ends_ledger() {
        let pages = ScriptedPages::default().with_page(None, vec![info(10, "a")], Some("c1"));

        let txs = collect_ledger(&pages, 10, 3).await.unwrap();

        assert_eq!(hashes(&txs), vec!["a"]);
        assert_eq!(pages.requested(), vec![None]);
    }

    #[tokio::test]
    async fn test_missing_cursor_ends_ledger() {
        let pages = ScriptedPages::default().with_page(None, vec![info(10, "a"), info(10, "b")], None);

        let txs = collect_ledger(&pages, 10, 2).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(pages.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_beyond_latest_is_not_found() {
        let pages = ScriptedPages::default().with_page(None, vec![], None);

        let err = collect_ledger(&pages, 101, 10).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(101)));
    }

    #[tokio::test]
    async fn test_malformed_event_fails_ledger() {
        let mut bad = info(10, "b");
        bad.events = grouped(vec!["AAAA".into()]);
        let pages = ScriptedPages::default().with_page(None, vec![info(10, "a"), bad], None);

        let err = collect_ledger(&pages, 10, 10).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed { ref tx, .. } if tx == "b"));
    }

    #[test]
    fn test_out_of_range_message() {
        assert!(is_out_of_range(
            "start ledger must be between the oldest ledger: 100 and the latest ledger: 200"
        ));
        assert!(!is_out_of_range("internal error"));
    }
}

//! JSON-RPC 2.0 over HTTP.

use super::types::{JsonRpcRequest, JsonRpcResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Response { code: i64, message: String },

    #[error("rpc response had neither result nor error")]
    EmptyResponse,

    #[error("invalid rpc payload: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[derive(Debug)]
pub(crate) struct JsonRpc {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpc {
    pub(crate) fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) async fn call<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(method, id, "rpc request");

        let response = self
            .http
            .post(&self.url)
            .json(&JsonRpcRequest {
                jsonrpc: "2.0",
                id,
                method,
                params,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Transport(format!("http {status}: {body}")));
        }

        let body: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| RpcError::Payload(e.to_string()))?;

        match (body.result, body.error) {
            (_, Some(err)) => Err(RpcError::Response {
                code: err.code,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(RpcError::EmptyResponse),
        }
    }
}

//! Lending pool reads and the liquidation call.
//!
//! Every read is a simulated contract call decoded through the codec. Reads
//! fail independently; callers decide whether to skip or abort.

use crate::codec::{i256_from_i128, i256_to_i128, NativeValue};
use crate::rpc::{ChainReader, ChainWriter, ReadError, SubmissionError, TxHash};
use crate::scval::{self, ScVal};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fixed-point scale of pool coefficients.
pub const POOL_PRECISION_FACTOR: i128 = 1_000_000_000;

/// Instance-storage key prefix under which the pool records its reserves.
const RESERVE_ASSET_KEY: &str = "ReserveAssetKey";

/// A fungible reserve of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reserve {
    /// Underlying asset contract
    pub asset: String,
    /// Debt token contract tracking borrowed balances
    pub debt_token: String,
}

/// Health summary of a borrower as reported by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountPosition {
    /// Net position value; non-positive means undercollateralized.
    pub npv: i128,
    pub debt: i128,
    pub discounted_collateral: i128,
}

/// `floor(coefficient * balance / POOL_PRECISION_FACTOR)` computed in 256 bits,
/// truncating toward zero. `None` if the result does not fit an `i128`.
pub fn compound_debt(coefficient: i128, balance: i128) -> Option<i128> {
    let product = i256_from_i128(coefficient) * i256_from_i128(balance);
    i256_to_i128(product / i256_from_i128(POOL_PRECISION_FACTOR))
}

fn address_arg(address: &str) -> Result<ScVal, ReadError> {
    scval::address(address).map_err(|e| ReadError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn int_result(method: &str, value: &NativeValue) -> Result<i128, ReadError> {
    value
        .as_i128()
        .ok_or_else(|| ReadError::UnexpectedResult(format!("{method}: expected i128, got {value:?}")))
}

/// Read-only view of one pool.
#[derive(Debug, Clone)]
pub struct PoolReader {
    reader: Arc<dyn ChainReader>,
    pool: String,
}

impl PoolReader {
    pub fn new(reader: Arc<dyn ChainReader>, pool: impl Into<String>) -> Self {
        Self {
            reader,
            pool: pool.into(),
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Fungible reserves among `assets`, in the given order.
    ///
    /// Assets whose reserve cannot be read are logged and left out.
    pub async fn list_reserves(&self, assets: &[String]) -> Vec<Reserve> {
        let results = join_all(assets.iter().map(|asset| self.reserve(asset))).await;

        let mut reserves = Vec::with_capacity(assets.len());
        for (asset, result) in assets.iter().zip(results) {
            match result {
                Ok(Some(reserve)) => reserves.push(reserve),
                Ok(None) => debug!(asset = %asset, "Skipping non-fungible reserve"),
                Err(e) => warn!(asset = %asset, error = %e, "Failed to read reserve"),
            }
        }
        reserves
    }

    /// `get_reserve(asset)`; `None` unless the reserve is fungible.
    pub async fn reserve(&self, asset: &str) -> Result<Option<Reserve>, ReadError> {
        let data = self
            .reader
            .simulate(&self.pool, "get_reserve", vec![address_arg(asset)?])
            .await?;
        let reserve_type = data
            .get("reserve_type")
            .and_then(NativeValue::as_slice)
            .ok_or_else(|| ReadError::UnexpectedResult("get_reserve: missing reserve_type".into()))?;

        if reserve_type.first().and_then(NativeValue::as_str) != Some("Fungible") {
            return Ok(None);
        }
        let debt_token = reserve_type
            .get(2)
            .and_then(NativeValue::as_address)
            .ok_or_else(|| ReadError::UnexpectedResult("get_reserve: missing debt token".into()))?;
        Ok(Some(Reserve {
            asset: asset.to_string(),
            debt_token: debt_token.to_string(),
        }))
    }

    /// Reserve assets recorded in the pool's instance storage.
    pub async fn discover_assets(&self) -> Result<Vec<String>, ReadError> {
        let storage = self.reader.contract_instance_storage(&self.pool).await?;
        let assets = storage
            .iter()
            .filter_map(|(key, _)| match key.as_slice() {
                Some([NativeValue::Text(tag), NativeValue::Address(asset)])
                    if tag == RESERVE_ASSET_KEY =>
                {
                    Some(asset.clone())
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        debug!(pool = %self.pool, count = assets.len(), "Discovered reserve assets");
        Ok(assets)
    }

    /// `token.balance(holder)`
    pub async fn balance(&self, token: &str, holder: &str) -> Result<i128, ReadError> {
        let value = self
            .reader
            .simulate(token, "balance", vec![address_arg(holder)?])
            .await?;
        int_result("balance", &value)
    }

    /// `account_position(user)`
    pub async fn account_position(&self, user: &str) -> Result<AccountPosition, ReadError> {
        let value = self
            .reader
            .simulate(&self.pool, "account_position", vec![address_arg(user)?])
            .await?;
        let field = |name: &str| -> Result<i128, ReadError> {
            let v = value.get(name).ok_or_else(|| {
                ReadError::UnexpectedResult(format!("account_position: missing {name}"))
            })?;
            int_result("account_position", v)
        };
        Ok(AccountPosition {
            npv: field("npv")?,
            debt: field("debt")?,
            discounted_collateral: field("discounted_collateral")?,
        })
    }

    /// `debt_coeff(asset)`, scaled by [`POOL_PRECISION_FACTOR`].
    pub async fn debt_coefficient(&self, asset: &str) -> Result<i128, ReadError> {
        let value = self
            .reader
            .simulate(&self.pool, "debt_coeff", vec![address_arg(asset)?])
            .await?;
        int_result("debt_coeff", &value)
    }

    /// Current debt of `user` in the reserve backed by `debt_token`.
    pub async fn compounded_debt(
        &self,
        user: &str,
        debt_token: &str,
        coefficient: i128,
    ) -> Result<i128, ReadError> {
        let balance = self.balance(debt_token, user).await?;
        compound_debt(coefficient, balance).ok_or_else(|| {
            ReadError::UnexpectedResult(format!(
                "debt overflow: coefficient {coefficient}, balance {balance}"
            ))
        })
    }
}

/// Submits liquidations against one pool as the writer's account.
#[derive(Debug, Clone)]
pub struct PoolLiquidator {
    writer: Arc<dyn ChainWriter>,
    pool: String,
}

impl PoolLiquidator {
    pub fn new(writer: Arc<dyn ChainWriter>, pool: impl Into<String>) -> Self {
        Self {
            writer,
            pool: pool.into(),
        }
    }

    pub fn keeper(&self) -> &str {
        self.writer.keeper_address()
    }

    /// `pool.liquidate(keeper, borrower)`
    pub async fn liquidate(&self, borrower: &str) -> Result<TxHash, SubmissionError> {
        let args = vec![address_arg(self.keeper())?, address_arg(borrower)?];
        self.writer.submit(&self.pool, "liquidate", args).await
    }
}

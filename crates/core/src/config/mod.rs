//! Keeper configuration.
//!
//! One TOML document with a section per concern. Every field has a serde
//! default so a partial file (or no file at all) yields a usable config once
//! the environment supplies the pool id, RPC URL and keeper secret.

mod loader;

pub use loader::{expand_vars, CONFIG_PATH_VAR, DEFAULT_CONFIG_PATH};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Passphrase of the public test network.
pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeeperConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub keeper: KeeperAccountConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub liquidation: LiquidationConfig,

    #[serde(default)]
    pub submission: SubmissionConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Chain endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Chain label; scopes persisted state
    #[serde(default = "default_chain")]
    pub chain: String,

    /// Soroban RPC endpoint
    #[serde(default)]
    pub rpc_url: String,

    /// Endpoint for historical transactions (defaults to `rpc_url`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,

    #[serde(default = "default_passphrase")]
    pub network_passphrase: String,
}

fn default_chain() -> String {
    "testnet".to_string()
}
fn default_passphrase() -> String {
    TESTNET_PASSPHRASE.to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            rpc_url: String::new(),
            archive_url: None,
            network_passphrase: default_passphrase(),
        }
    }
}

impl NetworkConfig {
    pub fn archive_url(&self) -> &str {
        self.archive_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.rpc_url)
    }
}

/// The pool being kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool contract id (`C...`)
    #[serde(default)]
    pub contract_id: String,

    /// Ledger the pool was deployed in; first ledger synced
    #[serde(default)]
    pub creation_ledger: u32,

    /// Reserve assets in liquidation order; empty means discover from storage
    #[serde(default)]
    pub assets: Vec<String>,
}

/// Keeper account.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KeeperAccountConfig {
    /// Secret seed (`S...`), usually `${KEEPER_SECRET}`
    #[serde(default)]
    pub secret: String,
}

impl std::fmt::Debug for KeeperAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeeperAccountConfig")
            .field("secret", &if self.secret.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

/// Ledger synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Attempts per ledger while the archive reports it missing
    #[serde(default = "default_archive_retry_attempts")]
    pub archive_retry_attempts: u32,

    #[serde(default = "default_archive_retry_delay")]
    pub archive_retry_delay_ms: u64,

    /// Transactions requested per archive page
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

fn default_archive_retry_attempts() -> u32 {
    10
}
fn default_archive_retry_delay() -> u64 {
    1000
}
fn default_page_limit() -> u32 {
    200
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            archive_retry_attempts: default_archive_retry_attempts(),
            archive_retry_delay_ms: default_archive_retry_delay(),
            page_limit: default_page_limit(),
        }
    }
}

impl SyncConfig {
    pub fn archive_retry_delay(&self) -> Duration {
        Duration::from_millis(self.archive_retry_delay_ms)
    }
}

/// Liquidation planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Upper bound on concurrent position reads
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
}

fn default_max_concurrent_reads() -> usize {
    16
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reads: default_max_concurrent_reads(),
        }
    }
}

/// Transaction submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Inclusion fee in stroops
    #[serde(default = "default_base_fee")]
    pub base_fee: u32,

    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_base_fee() -> u32 {
    100
}
fn default_poll_attempts() -> u32 {
    15
}
fn default_poll_interval() -> u64 {
    1000
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            base_fee: default_base_fee(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl SubmissionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Control loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between passes
    #[serde(default = "default_pass_interval")]
    pub pass_interval_ms: u64,
}

fn default_pass_interval() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pass_interval_ms: default_pass_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn pass_interval(&self) -> Duration {
        Duration::from_millis(self.pass_interval_ms)
    }
}

/// Persistent keeper state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("keeper-state.json")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl KeeperConfig {
    /// Reject configurations the keeper cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool.contract_id.is_empty() {
            anyhow::bail!("pool.contract_id is not set (POOL_ID)");
        }
        if self.network.rpc_url.is_empty() {
            anyhow::bail!("network.rpc_url is not set (SOROBAN_URL)");
        }
        if self.pool.creation_ledger == 0 {
            anyhow::bail!("pool.creation_ledger is not set (CONTRACT_CREATION_LEDGER)");
        }
        if self.keeper.secret.is_empty() {
            anyhow::bail!("keeper.secret is not set (KEEPER_SECRET)");
        }
        if self.liquidation.max_concurrent_reads == 0 {
            anyhow::bail!("liquidation.max_concurrent_reads must be positive");
        }
        Ok(())
    }

    /// Log the effective configuration, without secrets.
    pub fn log_config(&self) {
        tracing::info!(
            chain = %self.network.chain,
            rpc = %self.network.rpc_url,
            archive = %self.network.archive_url(),
            "Network configuration"
        );
        tracing::info!(
            pool = %self.pool.contract_id,
            creation_ledger = self.pool.creation_ledger,
            assets = self.pool.assets.len(),
            "Pool configuration"
        );
        tracing::info!(
            retry_attempts = self.sync.archive_retry_attempts,
            retry_delay_ms = self.sync.archive_retry_delay_ms,
            page_limit = self.sync.page_limit,
            "Sync parameters"
        );
        tracing::info!(
            max_concurrent_reads = self.liquidation.max_concurrent_reads,
            base_fee = self.submission.base_fee,
            poll_attempts = self.submission.poll_attempts,
            poll_interval_ms = self.submission.poll_interval_ms,
            pass_interval_ms = self.scheduler.pass_interval_ms,
            "Liquidation parameters"
        );
        tracing::info!(path = %self.store.path.display(), "State store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KeeperConfig::default();
        assert_eq!(config.sync.archive_retry_attempts, 10);
        assert_eq!(config.submission.poll_attempts, 15);
        assert_eq!(config.submission.base_fee, 100);
        assert_eq!(config.liquidation.max_concurrent_reads, 16);
        assert_eq!(config.network.network_passphrase, TESTNET_PASSPHRASE);
        assert_eq!(config.store.path, PathBuf::from("keeper-state.json"));
    }

    #[test]
    fn test_partial_toml() {
        let config: KeeperConfig = toml::from_str(
            r#"
            [network]
            rpc_url = "https://rpc.example"

            [pool]
            contract_id = "CPOOL"
            assets = ["CA", "CB"]

            [sync]
            archive_retry_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.network.archive_url(), "https://rpc.example");
        assert_eq!(config.pool.assets, vec!["CA", "CB"]);
        assert_eq!(config.sync.archive_retry_attempts, 3);
        assert_eq!(config.sync.page_limit, 200);
        assert_eq!(config.scheduler.pass_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate() {
        let mut config = KeeperConfig::default();
        assert!(config.validate().is_err());
        config.pool.contract_id = "CPOOL".into();
        config.network.rpc_url = "https://rpc.example".into();
        assert!(config.validate().is_err());
        config.keeper.secret = "SSECRET".into();
        // Ledger 0 would start the scan at genesis.
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("creation_ledger"));
        config.pool.creation_ledger = 51_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_not_in_debug() {
        let mut config = KeeperConfig::default();
        config.keeper.secret = "SVERYSECRET".into();
        assert!(!format!("{config:?}").contains("SVERYSECRET"));
    }

    #[test]
    fn test_serialization() {
        let mut config = KeeperConfig::default();
        config.pool.creation_ledger = 123;
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: KeeperConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.pool.creation_ledger, 123);
    }
}

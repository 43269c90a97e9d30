//! Loads [`KeeperConfig`] from TOML and the environment.
//!
//! Order: file (or defaults when absent), `${VAR}` expansion, then the
//! environment overrides below.

use super::KeeperConfig;
use anyhow::{Context, Result};
use regex_lite::{Captures, Regex};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable selecting the config file.
pub const CONFIG_PATH_VAR: &str = "KEEPER_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config/keeper.toml";

/// Expand `${VAR_NAME}` patterns; unknown variables are left untouched.
pub fn expand_vars(s: &str, lookup: &impl Fn(&str) -> Option<String>) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").context("env pattern")?;
    let expanded = re.replace_all(s, |caps: &Captures| {
        lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    Ok(expanded.into_owned())
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl KeeperConfig {
    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Load from `KEEPER_CONFIG` (or the default path) and the process
    /// environment, then validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let config = Self::load_with(&path, env_lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (defaults when missing) using `lookup` for variables.
    pub fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = if path.exists() {
            info!(path = %path.display(), "Loading keeper configuration");
            Self::from_file(path)?
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.expand_env_vars(&lookup)?;
        config.apply_overrides(&lookup)?;
        Ok(config)
    }

    /// Expand `${VAR}` in every string field that may reference secrets or URLs.
    pub fn expand_env_vars(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        self.network.rpc_url = expand_vars(&self.network.rpc_url, lookup)?;
        if let Some(archive) = self.network.archive_url.as_mut() {
            *archive = expand_vars(archive, lookup)?;
        }
        self.network.network_passphrase = expand_vars(&self.network.network_passphrase, lookup)?;
        self.pool.contract_id = expand_vars(&self.pool.contract_id, lookup)?;
        for asset in &mut self.pool.assets {
            *asset = expand_vars(asset, lookup)?;
        }
        self.keeper.secret = expand_vars(&self.keeper.secret, lookup)?;
        Ok(())
    }

    /// Apply the deployment environment variables on top of the file.
    pub fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("CHAIN") {
            self.network.chain = v;
        }
        if let Some(v) = lookup("SOROBAN_URL") {
            self.network.rpc_url = v;
        }
        if let Some(v) = lookup("ARCHIVE_URL") {
            self.network.archive_url = Some(v);
        }
        if let Some(v) = lookup("NETWORK_PASSPHRASE") {
            self.network.network_passphrase = v;
        }
        if let Some(v) = lookup("POOL_ID") {
            self.pool.contract_id = v;
        }
        if let Some(v) = lookup("CONTRACT_CREATION_LEDGER") {
            self.pool.creation_ledger = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid CONTRACT_CREATION_LEDGER {v:?}"))?;
        }
        if let Some(v) = lookup("POOL_ASSETS") {
            self.pool.assets = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("KEEPER_SECRET") {
            self.keeper.secret = v;
        }
        if let Some(v) = lookup("STORE_PATH") {
            self.store.path = PathBuf::from(v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_expand_vars() {
        let lookup = vars(&[("KEEPER_TEST_VAR", "value")]);
        assert_eq!(expand_vars("${KEEPER_TEST_VAR}", &lookup).unwrap(), "value");
        assert_eq!(
            expand_vars("https://${KEEPER_TEST_VAR}/rpc", &lookup).unwrap(),
            "https://value/rpc"
        );
        assert_eq!(expand_vars("${MISSING}", &lookup).unwrap(), "${MISSING}");
        assert_eq!(expand_vars("plain", &lookup).unwrap(), "plain");
    }

    #[test]
    fn test_overrides() {
        let mut config = KeeperConfig::default();
        let lookup = vars(&[
            ("POOL_ID", "CPOOL"),
            ("SOROBAN_URL", "https://rpc"),
            ("CONTRACT_CREATION_LEDGER", "1234"),
            ("POOL_ASSETS", "CA, CB,,"),
            ("CHAIN", "mainnet"),
            ("STORE_PATH", "/tmp/state.json"),
        ]);
        config.apply_overrides(&lookup).unwrap();
        assert_eq!(config.pool.contract_id, "CPOOL");
        assert_eq!(config.pool.creation_ledger, 1234);
        assert_eq!(config.pool.assets, vec!["CA", "CB"]);
        assert_eq!(config.network.chain, "mainnet");
        assert_eq!(config.network.archive_url(), "https://rpc");
        assert_eq!(config.store.path, PathBuf::from("/tmp/state.json"));
    }

    #[test]
    fn test_bad_creation_ledger() {
        let mut config = KeeperConfig::default();
        let lookup = vars(&[("CONTRACT_CREATION_LEDGER", "soon")]);
        assert!(config.apply_overrides(&lookup).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let lookup = vars(&[("KEEPER_SECRET", "SKEY")]);
        let config =
            KeeperConfig::load_with(Path::new("/nonexistent/keeper.toml"), lookup).unwrap();
        assert_eq!(config.keeper.secret, "SKEY");
        assert_eq!(config.sync.page_limit, 200);
    }

    #[test]
    fn test_file_with_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.toml");
        std::fs::write(
            &path,
            "[keeper]\nsecret = \"${KEEPER_SEED}\"\n[pool]\ncontract_id = \"CPOOL\"\n",
        )
        .unwrap();
        let config = KeeperConfig::load_with(&path, vars(&[("KEEPER_SEED", "SSEED")])).unwrap();
        assert_eq!(config.keeper.secret, "SSEED");
        assert_eq!(config.pool.contract_id, "CPOOL");
    }

    #[test]
    fn test_example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/keeper.example.toml");
        let config = KeeperConfig::load_with(
            &path,
            vars(&[("POOL_ID", "CPOOL"), ("KEEPER_SECRET", "SKEY")]),
        )
        .unwrap();
        // The example leaves the deployment ledger for the operator to fill in.
        assert!(config.validate().is_err());

        let config = KeeperConfig::load_with(
            &path,
            vars(&[
                ("POOL_ID", "CPOOL"),
                ("KEEPER_SECRET", "SKEY"),
                ("CONTRACT_CREATION_LEDGER", "51000"),
            ]),
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.network.archive_url(), "https://soroban-testnet.stellar.org");
        assert!(config.pool.assets.is_empty());
    }
}

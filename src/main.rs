//! Slender Liquidation Keeper
//!
//! Watches a Slender lending pool on Soroban, tracks every borrower seen in
//! the pool's `borrow` events and liquidates undercollateralized positions
//! with the keeper account's balances of the reserve assets.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_chain::{
    ArchiveClient, Keypair, PoolLiquidator, PoolReader, SorobanRpcClient, SubmissionSettings,
};
use keeper_core::{
    JsonFileStore, Keeper, KeeperConfig, LedgerSynchronizer, LiquidationEngine, Scope,
    SyncSettings, TokioDelay,
};

const DEFAULT_LOG_FILTER: &str = "info,keeper_core=debug,keeper_chain=debug";

#[tokio::main]
async fn main() {
    // Print startup banner
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "Keeper stopped with a fatal error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

async fn run() -> Result<()> {
    let config = KeeperConfig::load()?;
    config.log_config();

    let keeper = build_keeper(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C; shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    info!("Starting keeper loop");
    let passes = keeper.run(shutdown_rx).await?;
    info!(passes, "Keeper exited cleanly");
    Ok(())
}

/// Wire config → clients → stores → keeper.
fn build_keeper(config: &KeeperConfig) -> Result<Keeper> {
    let keypair = Keypair::from_secret(&config.keeper.secret).context("invalid keeper secret")?;
    info!(keeper = %keypair.address(), "Keeper account loaded");

    let settings = SubmissionSettings {
        base_fee: config.submission.base_fee,
        poll_attempts: config.submission.poll_attempts,
        poll_interval: config.submission.poll_interval(),
    };
    let rpc = Arc::new(
        SorobanRpcClient::new(
            &config.network.rpc_url,
            &config.network.network_passphrase,
            keypair,
        )
        .context("building Soroban RPC client")?
        .with_settings(settings),
    );
    let archive = Arc::new(
        ArchiveClient::new(config.network.archive_url(), config.sync.page_limit)
            .context("building archive client")?,
    );

    let store = Arc::new(
        JsonFileStore::open(&config.store.path)
            .with_context(|| format!("opening state file {}", config.store.path.display()))?,
    );
    let scope = Scope::new(&config.network.chain, &config.pool.contract_id);
    let delay = Arc::new(TokioDelay);

    let synchronizer = LedgerSynchronizer::new(
        rpc.clone(),
        archive,
        store.clone(),
        store.clone(),
        delay.clone(),
        scope.clone(),
    )
    .with_settings(SyncSettings {
        creation_ledger: config.pool.creation_ledger,
        retry_attempts: config.sync.archive_retry_attempts,
        retry_delay: config.sync.archive_retry_delay(),
    });

    let engine = LiquidationEngine::new(
        PoolReader::new(rpc.clone(), &config.pool.contract_id),
        PoolLiquidator::new(rpc, &config.pool.contract_id),
        store,
        scope,
    )
    .with_assets(config.pool.assets.clone())
    .with_max_concurrent_reads(config.liquidation.max_concurrent_reads);

    Ok(Keeper::new(synchronizer, engine, delay).with_pass_interval(config.scheduler.pass_interval()))
}

fn print_banner() {
    println!(
        r#"
    ╔═╗┬  ┌─┐┌┐┌┌┬┐┌─┐┬─┐  ╦╔═┌─┐┌─┐┌─┐┌─┐┬─┐
    ╚═╗│  ├┤ │││ ││├┤ ├┬┘  ╠╩╗├┤ ├┤ ├─┘├┤ ├┬┘
    ╚═╝┴─┘└─┘┘└┘─┴┘└─┘┴└─  ╩ ╩└─┘└─┘┴  └─┘┴└─
    Liquidation Keeper v0.1.0
    "#
    );
}

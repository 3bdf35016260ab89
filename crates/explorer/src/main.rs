mod api;
mod capacity;
mod error;
mod escrow;
mod pipeline;
mod store;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info, LevelFilter};
use shared::gridnetwork::{GridNetwork, GridPolicy};
use shared::stellar::Wallet;
use tokio::task::JoinSet;

use crate::api::server::start_server;
use crate::capacity::CapacityPlanner;
use crate::escrow::{Escrow, FreeEscrow, StellarEscrow};
use crate::store::core::{RedisStore, StoreContext};

#[derive(Parser)]
struct Args {
    /// Listen address
    #[arg(short = 'e', long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Redis store url
    #[arg(short = 's', long, default_value = "redis://localhost:6379")]
    redis_store_url: String,

    /// Grid network this deployment serves
    #[arg(long, default_value = "testnet")]
    network: String,

    /// Stellar wallet seed; escrow is disabled when omitted
    #[arg(long, default_value = "")]
    seed: String,

    /// Stellar network the wallet talks to
    #[arg(long, default_value = "testnet")]
    wallet_network: String,

    /// Horizon server url
    #[arg(long, default_value = "https://horizon-testnet.stellar.org")]
    horizon_url: String,

    /// Foundation address receiving the escrow cut; the cut stays in
    /// escrow when omitted
    #[arg(long, default_value = "")]
    foundation_address: String,

    /// Reusable flag adding a backup co-signer to escrow accounts; at
    /// least 5 are needed to activate multisig
    #[arg(long = "backupsigner")]
    backup_signers: Vec<String>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = match args.log_level.as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let network: GridNetwork = args.network.parse()?;
    let policy = GridPolicy::new(network, args.foundation_address.clone());

    let store = Arc::new(RedisStore::new(&args.redis_store_url));
    let store_context = Arc::new(StoreContext::new(store.clone()));

    let escrow: Arc<dyn Escrow> = if args.seed.is_empty() {
        info!("escrow disabled");
        Arc::new(FreeEscrow::new(store_context.clone()))
    } else {
        let wallet = Arc::new(Wallet::new(
            &args.seed,
            &args.wallet_network,
            &args.horizon_url,
            args.backup_signers.clone(),
        )?);
        info!(
            "escrow enabled on {}, explorer public address {}",
            args.wallet_network,
            wallet.public_address()
        );
        Arc::new(StellarEscrow::new(
            wallet,
            store_context.clone(),
            policy.clone(),
        ))
    };

    escrow
        .repush_pending_payments()
        .await
        .map_err(|e| anyhow::anyhow!("couldn't re-arm pending payments: {}", e))?;

    let planner = Arc::new(CapacityPlanner::new(
        store_context.clone(),
        escrow.clone(),
        policy.clone(),
    ));

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    let escrow_run = escrow.clone();
    tasks.spawn(async move { escrow_run.run().await });

    let escrow_payments = escrow.clone();
    tasks.spawn(async move { escrow_payments.payments_loop().await });

    let sweep_planner = planner.clone();
    tasks.spawn(async move { sweep_planner.run().await });

    tokio::select! {
        res = start_server(
            &args.host,
            args.port,
            store_context.clone(),
            planner,
            escrow,
            policy,
        ) => {
            if let Err(e) = res {
                error!("Server error: {}", e);
            }
        }
        Some(res) = tasks.join_next() => {
            if let Err(e) = res? {
                error!("Task error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    tasks.shutdown().await;
    Ok(())
}

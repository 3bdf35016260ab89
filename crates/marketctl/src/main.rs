use std::path::PathBuf;
use std::process::ExitCode;

use base64::Engine;
use chrono::Utc;
use clap::{Parser, Subcommand};
use ed25519_dalek::{Signer as _, SigningKey};
use log::error;
use rand::rngs::OsRng;
use serde_json::json;
use shared::models::pool::CapacityReservationData;
use shared::models::workload::{
    ReservationInfo, Volume, VolumeType, Workload, WorkloadData, WorkloadType,
};
use shared::security::auth_signature_middleware::signing_string;
use shared::security::keys;
use stellar_base::amount::{Amount, Stroops};
use stellar_base::asset::Asset as StellarAsset;
use stellar_base::crypto::{PublicKey, SodiumKeyPair};
use stellar_base::memo::Memo;
use stellar_base::network::Network;
use stellar_base::operations::Operation;
use stellar_base::transaction::{Transaction, MIN_BASE_FEE};
use stellar_base::xdr::XDRSerialize;
use stellar_horizon::api;
use stellar_horizon::client::{HorizonClient, HorizonHttpClient};

/// CLI exit codes shared with the deployment tooling.
const EXIT_OK: u8 = 0;
const EXIT_VALIDATION: u8 = 1;
const EXIT_CHAIN: u8 = 2;
const EXIT_STORE: u8 = 3;

#[derive(Parser)]
#[command(name = "marketctl", about = "Companion CLI for the capacity market explorer")]
struct Args {
    /// Explorer base url
    #[arg(short = 'u', long, default_value = "http://localhost:8080/api/v1")]
    explorer: String,

    /// Path to the hex encoded ed25519 seed used for signing
    #[arg(short = 'i', long, default_value = ".marketctl.seed")]
    identity: PathBuf,

    /// User id matching the identity
    #[arg(short = 't', long, default_value = "0")]
    tid: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a fresh identity seed and print the pubkey
    IdentityCreate,
    /// Register a user against the explorer phonebook
    UserRegister {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Reserve (or extend) a capacity pool
    PoolCreate {
        /// Extend this pool instead of creating one
        #[arg(long, default_value = "0")]
        pool_id: i64,
        #[arg(long, default_value = "0")]
        cus: u64,
        #[arg(long, default_value = "0")]
        sus: u64,
        #[arg(long, default_value = "0")]
        nus: u64,
        #[arg(long, default_value = "0")]
        ipv4us: u64,
        /// Reusable flag listing the target nodes
        #[arg(long = "node", required = true)]
        nodes: Vec<String>,
        /// Reusable flag listing acceptable currencies
        #[arg(long = "currency", default_values_t = vec!["TFT".to_string()])]
        currencies: Vec<String>,
    },
    /// Show a pool's live accounting
    PoolGet {
        #[arg(long)]
        id: i64,
    },
    /// Reserve an SSD or HDD volume against a pool
    VolumeCreate {
        #[arg(long)]
        pool_id: i64,
        #[arg(long)]
        node: String,
        /// Size in GiB
        #[arg(long)]
        size: i64,
        #[arg(long, default_value = "ssd")]
        kind: String,
    },
    /// Fetch one workload by its composite id
    WorkloadGet {
        #[arg(long)]
        gwid: String,
    },
    /// Co-sign a workload for provisioning or deletion
    Sign {
        #[arg(long)]
        id: i64,
        /// Push a delete signature instead of a provision one
        #[arg(long)]
        delete: bool,
    },
    /// Poll the work queue of a node
    Poll {
        #[arg(long)]
        node: String,
        #[arg(long, default_value = "0")]
        from: i64,
    },
    /// Pay a capacity reservation escrow from a stellar account
    PoolPay {
        #[arg(long)]
        reservation_id: i64,
        /// Escrow address returned by pool-create
        #[arg(long)]
        address: String,
        /// `CODE:ISSUER` asset returned by pool-create
        #[arg(long)]
        asset: String,
        /// Amount in stroops returned by pool-create
        #[arg(long)]
        amount: i64,
        /// Stellar secret seed of the paying account
        #[arg(long)]
        secret: String,
        #[arg(long, default_value = "https://horizon-testnet.stellar.org")]
        horizon: String,
        #[arg(long, default_value = "testnet")]
        stellar_network: String,
    },
}

fn load_identity(path: &PathBuf) -> anyhow::Result<SigningKey> {
    let seed = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read identity seed {}: {}", path.display(), e))?;
    keys::signing_key(seed.trim())
}

fn auth_header(key: &SigningKey, tid: i64) -> String {
    let created = Utc::now().timestamp();
    let signature = key.sign(signing_string(created, tid).as_bytes());
    format!(
        r#"Signature keyId="{}",algorithm="ed25519",created="{}",signature="{}""#,
        tid,
        created,
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
    )
}

/// Map an explorer response to the CLI exit contract.
async fn print_response(response: reqwest::Response) -> anyhow::Result<u8> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    println!("{}", body);
    if status.is_success() {
        Ok(EXIT_OK)
    } else if status.is_server_error() {
        Ok(EXIT_STORE)
    } else {
        Ok(EXIT_VALIDATION)
    }
}

async fn submit_workload(
    client: &reqwest::Client,
    explorer: &str,
    key: &SigningKey,
    tid: i64,
    mut workload: Workload,
) -> anyhow::Result<u8> {
    workload.info.customer_signature =
        keys::sign_hex(key, workload.signature_challenge().as_bytes());

    let response = client
        .post(format!("{}/reservations", explorer))
        .header("Authorization", auth_header(key, tid))
        .json(&workload)
        .send()
        .await?;
    print_response(response).await
}

async fn pay_escrow(
    reservation_id: i64,
    address: &str,
    asset: &str,
    amount: i64,
    secret: &str,
    horizon: &str,
    stellar_network: &str,
) -> anyhow::Result<()> {
    let source = SodiumKeyPair::from_secret_seed(secret)
        .map_err(|e| anyhow::anyhow!("invalid secret seed: {}", e))?;
    let destination = PublicKey::from_account_id(address)
        .map_err(|e| anyhow::anyhow!("invalid escrow address: {}", e))?;

    let (code, issuer) = asset
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("asset must be CODE:ISSUER"))?;
    let issuer = PublicKey::from_account_id(issuer)
        .map_err(|e| anyhow::anyhow!("invalid asset issuer: {}", e))?;
    let asset = StellarAsset::new_credit(code, issuer)
        .map_err(|e| anyhow::anyhow!("invalid asset: {}", e))?;

    let payment_amount = Amount::from_stroops(&Stroops::new(amount))
        .map_err(|e| anyhow::anyhow!("invalid amount: {}", e))?;
    let payment = Operation::new_payment()
        .with_destination(destination)
        .with_amount(payment_amount)
        .map_err(|e| anyhow::anyhow!("invalid amount: {}", e))?
        .with_asset(asset)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build payment: {}", e))?;

    let client = HorizonHttpClient::new_from_str(horizon)
        .map_err(|e| anyhow::anyhow!("invalid horizon url: {}", e))?;
    let request = api::accounts::single(&source.public_key());
    let (_headers, response) = client
        .request(request)
        .await
        .map_err(|e| anyhow::anyhow!("horizon account lookup failed: {}", e))?;
    let sequence = response.sequence.parse::<i64>()?;

    let network = match stellar_network {
        "production" => Network::new_public(),
        _ => Network::new_test(),
    };
    let memo = Memo::new_text(format!("p-{}", reservation_id))
        .map_err(|e| anyhow::anyhow!("invalid memo: {}", e))?;
    let mut tx = Transaction::builder(source.public_key().clone(), sequence, MIN_BASE_FEE)
        .with_memo(memo)
        .add_operation(payment)
        .into_transaction()
        .map_err(|e| anyhow::anyhow!("failed to build transaction: {}", e))?;
    tx.sign(source.as_ref(), &network)
        .map_err(|e| anyhow::anyhow!("failed to sign transaction: {}", e))?;
    let xdr = tx
        .into_envelope()
        .xdr_base64()
        .map_err(|e| anyhow::anyhow!("failed to serialize transaction: {}", e))?;

    let response = reqwest::Client::new()
        .post(format!("{}/transactions", horizon.trim_end_matches('/')))
        .form(&[("tx", xdr)])
        .send()
        .await?;
    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("horizon rejected the payment: {}", body);
    }
    println!("paid reservation {} ({} stroops {})", reservation_id, amount, code);
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<u8> {
    let client = reqwest::Client::new();
    let explorer = args.explorer.trim_end_matches('/').to_string();

    match args.command {
        Command::IdentityCreate => {
            let key = SigningKey::generate(&mut OsRng);
            std::fs::write(&args.identity, hex::encode(key.to_bytes()))?;
            println!(
                "{}",
                json!({
                    "seed_file": args.identity,
                    "pubkey": hex::encode(key.verifying_key().to_bytes()),
                })
            );
            Ok(EXIT_OK)
        }
        Command::UserRegister { name, email } => {
            let key = load_identity(&args.identity)?;
            let response = client
                .post(format!("{}/users", explorer))
                .json(&json!({
                    "name": name,
                    "email": email,
                    "pubkey": hex::encode(key.verifying_key().to_bytes()),
                }))
                .send()
                .await?;
            print_response(response).await
        }
        Command::PoolCreate {
            pool_id,
            cus,
            sus,
            nus,
            ipv4us,
            nodes,
            currencies,
        } => {
            let key = load_identity(&args.identity)?;
            let data = CapacityReservationData {
                pool_id,
                cus,
                sus,
                nus,
                ipv4us,
                node_ids: nodes,
                currencies,
            };
            let data_json = serde_json::to_string(&data)?;
            let reservation = json!({
                "json": data_json,
                "data_reservation": data,
                "customer_tid": args.tid,
                "customer_signature": keys::sign_hex(&key, data_json.as_bytes()),
            });

            let response = client
                .post(format!("{}/reservations/pools", explorer))
                .header("Authorization", auth_header(&key, args.tid))
                .json(&reservation)
                .send()
                .await?;
            print_response(response).await
        }
        Command::PoolGet { id } => {
            let response = client
                .get(format!("{}/reservations/pools/{}", explorer, id))
                .send()
                .await?;
            print_response(response).await
        }
        Command::VolumeCreate {
            pool_id,
            node,
            size,
            kind,
        } => {
            let key = load_identity(&args.identity)?;
            let kind = match kind.as_str() {
                "ssd" => VolumeType::Ssd,
                "hdd" => VolumeType::Hdd,
                other => anyhow::bail!("unknown volume kind '{}'", other),
            };
            let workload = Workload {
                info: ReservationInfo {
                    node_id: node,
                    pool_id,
                    customer_tid: args.tid,
                    workload_type: WorkloadType::Volume,
                    ..Default::default()
                },
                data: WorkloadData::Volume(Volume { size, kind }),
            };
            submit_workload(&client, &explorer, &key, args.tid, workload).await
        }
        Command::WorkloadGet { gwid } => {
            let response = client
                .get(format!("{}/reservations/workloads/{}", explorer, gwid))
                .send()
                .await?;
            print_response(response).await
        }
        Command::Sign { id, delete } => {
            let key = load_identity(&args.identity)?;
            let workload: Workload = client
                .get(format!("{}/reservations/workloads/{}-1", explorer, id))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let signature = json!({
                "tid": args.tid,
                "signature": keys::sign_hex(&key, workload.signature_challenge().as_bytes()),
            });
            let kind = if delete { "delete" } else { "provision" };
            let response = client
                .post(format!("{}/reservations/{}/sign/{}", explorer, id, kind))
                .header("Authorization", auth_header(&key, args.tid))
                .json(&signature)
                .send()
                .await?;
            print_response(response).await
        }
        Command::Poll { node, from } => {
            let response = client
                .get(format!(
                    "{}/reservations/workloads/{}?from={}",
                    explorer, node, from
                ))
                .send()
                .await?;
            if let Some(last_id) = response.headers().get("x-last-id") {
                eprintln!("x-last-id: {}", last_id.to_str().unwrap_or_default());
            }
            print_response(response).await
        }
        Command::PoolPay {
            reservation_id,
            address,
            asset,
            amount,
            secret,
            horizon,
            stellar_network,
        } => {
            match pay_escrow(
                reservation_id,
                &address,
                &asset,
                amount,
                &secret,
                &horizon,
                &stellar_network,
            )
            .await
            {
                Ok(()) => Ok(EXIT_OK),
                Err(e) => {
                    error!("payment failed: {e}");
                    Ok(EXIT_CHAIN)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            // connection-level failures mean the explorer (or its store)
            // is unreachable
            if e.downcast_ref::<reqwest::Error>()
                .map(|e| e.is_connect() || e.is_timeout())
                .unwrap_or(false)
            {
                ExitCode::from(EXIT_STORE)
            } else {
                ExitCode::from(EXIT_VALIDATION)
            }
        }
    }
}

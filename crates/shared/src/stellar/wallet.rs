use serde::Deserialize;
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

use crate::models::escrow::EscrowAddress;
use crate::stellar::asset::Asset;

/// Stroops a freshly created escrow account is seeded with (10 XLM),
/// covering the base reserve plus one trustline per supported asset.
const ESCROW_STARTING_BALANCE: i64 = 100_000_000;

/// Multisig escrow accounts need at least this many co-signers.
const MIN_BACKUP_SIGNERS: usize = 5;

/// An incoming transfer observed on an escrow address.
#[derive(Debug, Clone)]
pub struct PaymentInfo {
    pub from: String,
    pub to: String,
    pub asset_code: String,
    pub amount_stroops: i64,
}

#[derive(Debug, Deserialize)]
struct HorizonPaymentRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    asset_code: Option<String>,
    #[serde(default)]
    amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HorizonEmbedded<T> {
    records: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HorizonPage<T> {
    #[serde(rename = "_embedded")]
    embedded: HorizonEmbedded<T>,
}

#[derive(Debug, Deserialize)]
struct HorizonBalance {
    balance: String,
    #[serde(default)]
    asset_code: Option<String>,
    #[serde(default)]
    asset_issuer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HorizonAccount {
    balances: Vec<HorizonBalance>,
}

/// Parse a horizon decimal amount ("25.0000000") into stroops.
pub fn amount_to_stroops(amount: &str) -> anyhow::Result<i64> {
    let value: f64 = amount.parse()?;
    Ok((value * 10_000_000.0).round() as i64)
}

/// The explorer's stellar wallet: creates escrow accounts, watches incoming
/// payments and moves funds for disbursement and refunds.
pub struct Wallet {
    keypair: SodiumKeyPair,
    network: Network,
    horizon_url: String,
    client: HorizonHttpClient,
    http: reqwest::Client,
    backup_signers: Vec<String>,
}

impl Wallet {
    pub fn new(
        seed: &str,
        network: &str,
        horizon_url: &str,
        backup_signers: Vec<String>,
    ) -> anyhow::Result<Self> {
        let keypair = SodiumKeyPair::from_secret_seed(seed)
            .map_err(|e| anyhow::anyhow!("invalid wallet seed: {}", e))?;
        let network = match network {
            "production" => Network::new_public(),
            "testnet" => Network::new_test(),
            other => anyhow::bail!("unknown stellar network '{}'", other),
        };
        if !backup_signers.is_empty() && backup_signers.len() < MIN_BACKUP_SIGNERS {
            anyhow::bail!(
                "need at least {} backup signers to activate multisig, got {}",
                MIN_BACKUP_SIGNERS,
                backup_signers.len()
            );
        }
        let client = HorizonHttpClient::new_from_str(horizon_url)
            .map_err(|e| anyhow::anyhow!("invalid horizon url: {}", e))?;

        Ok(Wallet {
            keypair,
            network,
            horizon_url: horizon_url.trim_end_matches('/').to_string(),
            client,
            http: reqwest::Client::new(),
            backup_signers,
        })
    }

    pub fn public_address(&self) -> String {
        self.keypair.public_key().account_id()
    }

    pub fn backup_signers(&self) -> &[String] {
        &self.backup_signers
    }

    async fn sequence_of(&self, account: &PublicKey) -> anyhow::Result<i64> {
        let request = api::accounts::single(account);
        let (_headers, response) = self
            .client
            .request(request)
            .await
            .map_err(|e| anyhow::anyhow!("horizon account lookup failed: {}", e))?;
        Ok(response.sequence.parse::<i64>()?)
    }

    fn credit_asset(asset: &Asset) -> anyhow::Result<StellarAsset> {
        let issuer = PublicKey::from_account_id(asset.issuer())
            .map_err(|e| anyhow::anyhow!("invalid asset issuer: {}", e))?;
        StellarAsset::new_credit(asset.code(), issuer)
            .map_err(|e| anyhow::anyhow!("invalid asset: {}", e))
    }

    async fn submit(&self, xdr: String) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{}/transactions", self.horizon_url))
            .form(&[("tx", xdr)])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("horizon submit failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("horizon rejected transaction ({}): {}", status, body);
        }
        Ok(())
    }

    fn sign_into_xdr(
        &self,
        mut tx: Transaction,
        extra: Option<&SodiumKeyPair>,
    ) -> anyhow::Result<String> {
        tx.sign(self.keypair.as_ref(), &self.network)
            .map_err(|e| anyhow::anyhow!("failed to sign transaction: {}", e))?;
        if let Some(keypair) = extra {
            tx.sign(keypair.as_ref(), &self.network)
                .map_err(|e| anyhow::anyhow!("failed to co-sign transaction: {}", e))?;
        }
        tx.into_envelope()
            .xdr_base64()
            .map_err(|e| anyhow::anyhow!("failed to serialize transaction: {}", e))
    }

    /// Create and fund a fresh escrow account and open trustlines for the
    /// given assets so customers can pay in any of them.
    pub async fn create_escrow_account(&self, assets: &[Asset]) -> anyhow::Result<EscrowAddress> {
        let escrow = SodiumKeyPair::random()
            .map_err(|e| anyhow::anyhow!("failed to generate escrow keypair: {}", e))?;

        let starting = Amount::from_stroops(&Stroops::new(ESCROW_STARTING_BALANCE))
            .map_err(|e| anyhow::anyhow!("invalid starting balance: {}", e))?;
        let create = Operation::new_create_account()
            .with_destination(escrow.public_key().clone())
            .with_starting_balance(starting)
            .map_err(|e| anyhow::anyhow!("invalid starting balance: {}", e))?
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build create account operation: {}", e))?;

        let sequence = self.sequence_of(&self.keypair.public_key()).await?;
        let mut builder = Transaction::builder(
            self.keypair.public_key().clone(),
            sequence,
            MIN_BASE_FEE,
        )
        .add_operation(create);

        // open the trustlines in the same transaction, signed by the new
        // account as the operation source
        for asset in assets {
            let trust = Operation::new_change_trust()
                .with_source_account(escrow.public_key().clone())
                .with_asset(Self::credit_asset(asset)?.into())
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build change trust operation: {}", e))?;
            builder = builder.add_operation(trust);
        }

        let tx = builder
            .into_transaction()
            .map_err(|e| anyhow::anyhow!("failed to build transaction: {}", e))?;
        let xdr = self.sign_into_xdr(tx, Some(&escrow))?;
        self.submit(xdr).await?;

        Ok(EscrowAddress {
            address: escrow.public_key().account_id(),
            secret: escrow.secret_key().secret_seed(),
        })
    }

    /// Sum of the given asset currently sitting on `address`, in stroops.
    pub async fn balance(&self, address: &str, asset: &Asset) -> anyhow::Result<i64> {
        let url = format!("{}/accounts/{}", self.horizon_url, address);
        let account: HorizonAccount = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("horizon account fetch failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("horizon account fetch failed: {}", e))?
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("malformed horizon account: {}", e))?;

        for entry in account.balances {
            if entry.asset_code.as_deref() == Some(asset.code())
                && entry.asset_issuer.as_deref() == Some(asset.issuer())
            {
                return amount_to_stroops(&entry.balance);
            }
        }
        Ok(0)
    }

    /// Incoming payments on `address`, oldest first.
    pub async fn payments(&self, address: &str) -> anyhow::Result<Vec<PaymentInfo>> {
        let url = format!(
            "{}/accounts/{}/payments?order=asc&limit=200",
            self.horizon_url, address
        );
        let page: HorizonPage<HorizonPaymentRecord> = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("horizon payments fetch failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("horizon payments fetch failed: {}", e))?
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("malformed horizon payments page: {}", e))?;

        let mut payments = Vec::new();
        for record in page.embedded.records {
            if record.kind != "payment" {
                continue;
            }
            let (Some(code), Some(amount)) = (record.asset_code, record.amount) else {
                continue;
            };
            payments.push(PaymentInfo {
                from: record.from,
                to: record.to,
                asset_code: code,
                amount_stroops: amount_to_stroops(&amount)?,
            });
        }
        Ok(payments)
    }

    /// Pay `amount_stroops` of `asset` from the account behind
    /// `source_secret` to `destination`.
    pub async fn pay_from(
        &self,
        source_secret: &str,
        destination: &str,
        asset: &Asset,
        amount_stroops: i64,
        memo: &str,
    ) -> anyhow::Result<()> {
        if amount_stroops <= 0 {
            return Ok(());
        }
        let source = SodiumKeyPair::from_secret_seed(source_secret)
            .map_err(|e| anyhow::anyhow!("invalid escrow secret: {}", e))?;
        let destination = PublicKey::from_account_id(destination)
            .map_err(|e| anyhow::anyhow!("invalid destination address: {}", e))?;

        let amount = Amount::from_stroops(&Stroops::new(amount_stroops))
            .map_err(|e| anyhow::anyhow!("invalid amount: {}", e))?;
        let payment = Operation::new_payment()
            .with_destination(destination)
            .with_amount(amount)
            .map_err(|e| anyhow::anyhow!("invalid amount: {}", e))?
            .with_asset(Self::credit_asset(asset)?)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build payment operation: {}", e))?;

        let sequence = self.sequence_of(&source.public_key()).await?;
        let memo = Memo::new_text(memo).map_err(|e| anyhow::anyhow!("invalid memo: {}", e))?;
        let mut tx = Transaction::builder(source.public_key().clone(), sequence, MIN_BASE_FEE)
            .with_memo(memo)
            .add_operation(payment)
            .into_transaction()
            .map_err(|e| anyhow::anyhow!("failed to build transaction: {}", e))?;

        tx.sign(source.as_ref(), &self.network)
            .map_err(|e| anyhow::anyhow!("failed to sign transaction: {}", e))?;
        let xdr = tx
            .into_envelope()
            .xdr_base64()
            .map_err(|e| anyhow::anyhow!("failed to serialize transaction: {}", e))?;
        self.submit(xdr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_amounts_parse_to_stroops() {
        assert_eq!(amount_to_stroops("25.0000000").unwrap(), 250_000_000);
        assert_eq!(amount_to_stroops("0.0000001").unwrap(), 1);
        assert!(amount_to_stroops("not-a-number").is_err());
    }
}

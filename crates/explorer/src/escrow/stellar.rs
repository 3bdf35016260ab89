use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info};
use shared::gridnetwork::{GridPolicy, FREE_TFT_CODE};
use shared::models::escrow::{
    CapacityPoolPayment, CustomerCapacityEscrowInformation, PaymentState,
};
use shared::models::pool::CapacityReservation;
use shared::stellar::{Asset, Wallet};
use tokio::time::interval;

use crate::error::ExplorerError;
use crate::escrow::{credit_pool, with_backoff, Escrow};
use crate::store::core::StoreContext;

/// Seconds between scans of pending addresses for incoming transfers.
const PAYMENT_POLL_INTERVAL: u64 = 10;

/// Seconds between expiry scans.
const EXPIRY_POLL_INTERVAL: u64 = 60;

const CHAIN_ATTEMPTS: u32 = 5;

/// Billing preference when several currencies are acceptable. FreeTFT wins
/// when permitted since it is worthless by construction.
const ASSET_PREFERENCE: [&str; 3] = [FREE_TFT_CODE, "TFT", "TFTA"];

/// Pick the single asset to bill from the intersection of the reservation's
/// currencies and the network's whitelist.
pub(crate) fn select_asset(
    policy: &GridPolicy,
    currencies: &[String],
    all_free_to_use: bool,
) -> Result<Asset, ExplorerError> {
    for code in ASSET_PREFERENCE {
        if code == FREE_TFT_CODE && !all_free_to_use {
            continue;
        }
        if !currencies.iter().any(|c| c == code) {
            continue;
        }
        if let Some(asset) = policy.asset_by_code(code) {
            return Ok(asset);
        }
    }
    Err(ExplorerError::Validation(
        "no currency shared between the reservation and this network".to_string(),
    ))
}

/// Wallet-backed escrow: per-reservation accounts on the stellar chain,
/// payment detection, disbursement to farmers and the foundation, refunds.
pub struct StellarEscrow {
    wallet: Arc<Wallet>,
    store: Arc<StoreContext>,
    policy: GridPolicy,
}

impl StellarEscrow {
    pub fn new(wallet: Arc<Wallet>, store: Arc<StoreContext>, policy: GridPolicy) -> Self {
        Self {
            wallet,
            store,
            policy,
        }
    }

    /// Settle a funded payment: credit the pool, then sweep the escrow
    /// balance to the farmers and the foundation.
    async fn settle_paid(&self, mut payment: CapacityPoolPayment) -> anyhow::Result<()> {
        let asset = Asset::parse(&payment.asset)?;

        payment.state = PaymentState::Paid;
        self.store.escrow_store.save_payment(&payment).await?;

        credit_pool(&self.store, &payment).await?;
        info!(
            "pool {} funded with reservation {} ({} stroops {})",
            payment.pool_id,
            payment.reservation_id,
            payment.received_amount,
            asset.code()
        );

        let Some(address) = self.store.escrow_store.address(&payment.address).await? else {
            anyhow::bail!("escrow account {} has no stored secret", payment.address);
        };

        let total = payment.received_amount;
        let foundation_cut = if self.policy.foundation_address.is_empty() {
            0
        } else {
            self.policy.foundation_amount(total)
        };

        // farmer disbursement, split over the nodes backing the pool
        let node_ids = &payment.data.node_ids;
        let per_node = (total - foundation_cut) / node_ids.len().max(1) as i64;
        let memo = format!("p-{}", payment.reservation_id);

        for node_id in node_ids {
            let Some(node) = self.store.node_store.get(node_id).await? else {
                error!("node {} vanished, skipping its payout", node_id);
                continue;
            };
            let Some(farm) = self.store.farm_store.get(node.farm_id).await? else {
                error!("farm {} vanished, skipping its payout", node.farm_id);
                continue;
            };
            let Some(destination) = farm.wallet_for(asset.code()) else {
                error!(
                    "farm {} has no {} wallet on file, skipping its payout",
                    farm.id,
                    asset.code()
                );
                continue;
            };

            let wallet = self.wallet.clone();
            let secret = address.secret.clone();
            let destination = destination.to_string();
            let asset = asset.clone();
            let memo = memo.clone();
            with_backoff("farmer payout", CHAIN_ATTEMPTS, || {
                wallet.pay_from(&secret, &destination, &asset, per_node, &memo)
            })
            .await?;
        }

        if foundation_cut > 0 {
            let wallet = self.wallet.clone();
            let secret = address.secret.clone();
            let destination = self.policy.foundation_address.clone();
            let asset = asset.clone();
            let memo = memo.clone();
            with_backoff("foundation payout", CHAIN_ATTEMPTS, || {
                wallet.pay_from(&secret, &destination, &asset, foundation_cut, &memo)
            })
            .await?;
        }

        Ok(())
    }

    /// Return whatever arrived on the escrow address to its first sender.
    async fn refund(&self, payment: &CapacityPoolPayment) -> anyhow::Result<()> {
        let asset = Asset::parse(&payment.asset)?;
        let received = self.wallet.balance(&payment.address, &asset).await?;
        if received <= 0 {
            return Ok(());
        }

        let payments = self.wallet.payments(&payment.address).await?;
        let Some(sender) = payments
            .iter()
            .find(|p| p.to == payment.address && p.asset_code == asset.code())
            .map(|p| p.from.clone())
        else {
            anyhow::bail!(
                "escrow {} holds funds but no incoming payment is visible",
                payment.address
            );
        };

        let Some(address) = self.store.escrow_store.address(&payment.address).await? else {
            anyhow::bail!("escrow account {} has no stored secret", payment.address);
        };

        let memo = format!("r-{}", payment.reservation_id);
        let wallet = self.wallet.clone();
        with_backoff("refund", CHAIN_ATTEMPTS, || {
            wallet.pay_from(&address.secret, &sender, &asset, received, &memo)
        })
        .await
    }

    async fn check_pending_payment(&self, payment: CapacityPoolPayment) -> anyhow::Result<()> {
        let asset = Asset::parse(&payment.asset)?;
        let received = self.wallet.balance(&payment.address, &asset).await?;
        debug!(
            "escrow {} holds {}/{} stroops",
            payment.address, received, payment.expected_amount
        );

        if received >= payment.expected_amount {
            let mut paid = payment;
            paid.received_amount = received;
            self.settle_paid(paid).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Escrow for StellarEscrow {
    async fn reserve_capacity(
        &self,
        reservation: &CapacityReservation,
        currencies: Vec<String>,
        all_free_to_use: bool,
    ) -> Result<CustomerCapacityEscrowInformation, ExplorerError> {
        let asset = select_asset(&self.policy, &currencies, all_free_to_use)?;
        let amount = self
            .policy
            .escrow_amount(&asset, &reservation.data_reservation);

        let assets = self.policy.supported_assets();
        let wallet = self.wallet.clone();
        let escrow_account = with_backoff("escrow account creation", CHAIN_ATTEMPTS, || {
            wallet.create_escrow_account(&assets)
        })
        .await
        .map_err(|e| ExplorerError::ChainTransient(e.to_string()))?;

        self.store
            .escrow_store
            .save_address(&escrow_account)
            .await
            .map_err(|e| ExplorerError::StoreTransient(e.to_string()))?;

        let payment = CapacityPoolPayment {
            reservation_id: reservation.id,
            pool_id: reservation.data_reservation.pool_id,
            customer_tid: reservation.customer_tid,
            address: escrow_account.address.clone(),
            asset: asset.as_str().to_string(),
            expected_amount: amount,
            received_amount: 0,
            state: PaymentState::Pending,
            created_at: Utc::now().timestamp(),
            data: reservation.data_reservation.clone(),
        };
        self.store
            .escrow_store
            .save_payment(&payment)
            .await
            .map_err(|e| ExplorerError::StoreTransient(e.to_string()))?;

        Ok(CustomerCapacityEscrowInformation {
            address: escrow_account.address,
            asset: asset.as_str().to_string(),
            amount,
        })
    }

    async fn cancel_reservation(&self, reservation_id: i64) -> Result<(), ExplorerError> {
        let payment = self
            .store
            .escrow_store
            .payment(reservation_id)
            .await
            .map_err(|e| ExplorerError::StoreTransient(e.to_string()))?
            .ok_or_else(|| {
                ExplorerError::NotFound(format!("no payment for reservation {}", reservation_id))
            })?;

        if payment.state != PaymentState::Pending {
            return Err(ExplorerError::Conflict(
                "only pending reservations can be canceled".to_string(),
            ));
        }

        self.refund(&payment)
            .await
            .map_err(|e| ExplorerError::ChainTransient(e.to_string()))?;

        let mut canceled = payment;
        canceled.state = PaymentState::Canceled;
        self.store
            .escrow_store
            .save_payment(&canceled)
            .await
            .map_err(|e| ExplorerError::StoreTransient(e.to_string()))?;
        Ok(())
    }

    async fn repush_pending_payments(&self) -> Result<(), ExplorerError> {
        let pending = self
            .store
            .escrow_store
            .pending_payments()
            .await
            .map_err(|e| ExplorerError::StoreTransient(e.to_string()))?;
        info!("watching {} pending escrow payments", pending.len());
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        let mut ticker = interval(Duration::from_secs(EXPIRY_POLL_INTERVAL));
        info!("escrow expiry watcher running");

        loop {
            ticker.tick().await;
            let pending = match self.store.escrow_store.pending_payments().await {
                Ok(pending) => pending,
                Err(e) => {
                    error!("failed to list pending payments: {e}");
                    continue;
                }
            };

            let now = Utc::now().timestamp();
            let deadline = self.policy.payment_window + self.policy.payment_grace;
            for payment in pending {
                if !payment.expired(now, deadline) {
                    continue;
                }
                info!(
                    "escrow payment for reservation {} expired unfunded",
                    payment.reservation_id
                );
                if let Err(e) = self.refund(&payment).await {
                    error!(
                        "failed to refund expired reservation {}: {e}",
                        payment.reservation_id
                    );
                    continue;
                }
                let mut expired = payment;
                expired.state = PaymentState::Expired;
                if let Err(e) = self.store.escrow_store.save_payment(&expired).await {
                    error!("failed to persist expired payment: {e}");
                }
            }
        }
    }

    async fn payments_loop(&self) -> anyhow::Result<()> {
        let mut ticker = interval(Duration::from_secs(PAYMENT_POLL_INTERVAL));
        info!("escrow payments watcher running");

        loop {
            ticker.tick().await;
            let pending = match self.store.escrow_store.pending_payments().await {
                Ok(pending) => pending,
                Err(e) => {
                    error!("failed to list pending payments: {e}");
                    continue;
                }
            };

            for payment in pending {
                let reservation_id = payment.reservation_id;
                if let Err(e) = self.check_pending_payment(payment).await {
                    error!("failed to reconcile reservation {}: {e}", reservation_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::gridnetwork::GridNetwork;

    #[test]
    fn asset_selection_prefers_free_tft_only_when_allowed() {
        let policy = GridPolicy::new(GridNetwork::Mainnet, String::new());
        let currencies = vec![
            "FreeTFT".to_string(),
            "TFT".to_string(),
            "TFTA".to_string(),
        ];

        let asset = select_asset(&policy, &currencies, true).unwrap();
        assert_eq!(asset.code(), "FreeTFT");

        let asset = select_asset(&policy, &currencies, false).unwrap();
        assert_eq!(asset.code(), "TFT");

        let asset = select_asset(&policy, &["TFTA".to_string()], false).unwrap();
        assert_eq!(asset.code(), "TFTA");

        assert!(select_asset(&policy, &["DOGE".to_string()], true).is_err());
        assert!(select_asset(&policy, &["FreeTFT".to_string()], false).is_err());
    }
}

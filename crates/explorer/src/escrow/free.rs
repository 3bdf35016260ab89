use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use shared::models::escrow::{
    CapacityPoolPayment, CustomerCapacityEscrowInformation, PaymentState,
};
use shared::models::pool::CapacityReservation;
use tokio::time::sleep;

use crate::error::ExplorerError;
use crate::escrow::{credit_pool, Escrow};
use crate::store::core::StoreContext;

/// Escrow used when the explorer runs without a wallet seed: nothing is
/// billed, reservations are credited immediately.
pub struct FreeEscrow {
    store: Arc<StoreContext>,
}

impl FreeEscrow {
    pub fn new(store: Arc<StoreContext>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Escrow for FreeEscrow {
    async fn reserve_capacity(
        &self,
        reservation: &CapacityReservation,
        _currencies: Vec<String>,
        _all_free_to_use: bool,
    ) -> Result<CustomerCapacityEscrowInformation, ExplorerError> {
        let payment = CapacityPoolPayment {
            reservation_id: reservation.id,
            pool_id: reservation.data_reservation.pool_id,
            customer_tid: reservation.customer_tid,
            address: String::new(),
            asset: String::new(),
            expected_amount: 0,
            received_amount: 0,
            state: PaymentState::Paid,
            created_at: Utc::now().timestamp(),
            data: reservation.data_reservation.clone(),
        };

        self.store
            .escrow_store
            .save_payment(&payment)
            .await
            .map_err(|e| ExplorerError::StoreTransient(e.to_string()))?;
        credit_pool(&self.store, &payment)
            .await
            .map_err(|e| ExplorerError::StoreTransient(e.to_string()))?;

        Ok(CustomerCapacityEscrowInformation::default())
    }

    async fn cancel_reservation(&self, _reservation_id: i64) -> Result<(), ExplorerError> {
        Ok(())
    }

    async fn repush_pending_payments(&self) -> Result<(), ExplorerError> {
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        info!("escrow disabled, expiry watcher idle");
        loop {
            sleep(Duration::from_secs(3_600)).await;
        }
    }

    async fn payments_loop(&self) -> anyhow::Result<()> {
        info!("escrow disabled, payments watcher idle");
        loop {
            sleep(Duration::from_secs(3_600)).await;
        }
    }
}

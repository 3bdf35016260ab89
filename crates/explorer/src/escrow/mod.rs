pub mod free;
pub mod stellar;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use shared::models::escrow::{CapacityPoolPayment, CustomerCapacityEscrowInformation};
use shared::models::pool::CapacityReservation;
use tokio::time::sleep;

use crate::error::ExplorerError;
use crate::store::core::StoreContext;
use crate::store::domains::pool_store::CasOutcome;

pub use free::FreeEscrow;
pub use stellar::StellarEscrow;

const CAS_ATTEMPTS: usize = 10;

/// Longest pause between retries of a failing chain or store interaction.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Payment mediation between customers and the grid. Implementations decide
/// how (and whether) money actually moves.
#[async_trait]
pub trait Escrow: Send + Sync {
    /// Price a pool reservation, set up an escrow account for it and return
    /// the funding instructions.
    async fn reserve_capacity(
        &self,
        reservation: &CapacityReservation,
        currencies: Vec<String>,
        all_free_to_use: bool,
    ) -> Result<CustomerCapacityEscrowInformation, ExplorerError>;

    /// Customer-initiated cancel of a not-yet-paid reservation.
    async fn cancel_reservation(&self, reservation_id: i64) -> Result<(), ExplorerError>;

    /// Re-arm the watch for payments that were pending when the process
    /// last stopped.
    async fn repush_pending_payments(&self) -> Result<(), ExplorerError>;

    /// Expiry watcher: refunds and closes payments that outlived their
    /// window.
    async fn run(&self) -> anyhow::Result<()>;

    /// Chain watcher: detects incoming transfers on pending addresses and
    /// settles them.
    async fn payments_loop(&self) -> anyhow::Result<()>;
}

/// Retry `op` with exponential backoff. Transient chain failures are normal
/// operation, not errors, until the attempts run out.
pub(crate) async fn with_backoff<T, F, Fut>(
    what: &str,
    attempts: u32,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(e);
                }
                warn!("{what} failed (attempt {attempt}/{attempts}), retrying in {delay:?}: {e}");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Credit a paid reservation into its pool, extending the node set when the
/// reservation added nodes. Serialized against settlement by CAS.
pub(crate) async fn credit_pool(
    store: &Arc<StoreContext>,
    payment: &CapacityPoolPayment,
) -> anyhow::Result<()> {
    let asset_code = payment.asset.split(':').next().unwrap_or_default().to_string();

    for _ in 0..CAS_ATTEMPTS {
        let Some(mut pool) = store.pool_store.get(payment.pool_id).await? else {
            anyhow::bail!("pool {} does not exist", payment.pool_id);
        };
        let expected = pool.last_updated;

        pool.credit(
            &payment.data,
            &asset_code,
            payment.expected_amount,
            Utc::now().timestamp(),
        );
        for node_id in &payment.data.node_ids {
            if !pool.node_ids.contains(node_id) {
                pool.node_ids.push(node_id.clone());
            }
        }

        match store.pool_store.update_cas(&pool, expected).await? {
            CasOutcome::Written => {
                // parked workloads may fit now
                crate::capacity::planner::promote_funded_pool(store, payment.pool_id).await?;
                return Ok(());
            }
            CasOutcome::Stale => continue,
            CasOutcome::Missing => anyhow::bail!("pool {} disappeared", payment.pool_id),
        }
    }
    anyhow::bail!("pool {} credit kept racing, giving up", payment.pool_id)
}

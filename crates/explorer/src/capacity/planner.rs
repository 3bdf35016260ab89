use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info};
use shared::gridnetwork::{GridPolicy, FREE_TFT_CODE};
use shared::models::escrow::CustomerCapacityEscrowInformation;
use shared::models::pool::{CapacityReservation, Pool};
use shared::models::workload::{NextAction, Workload};
use tokio::time::interval;

use crate::capacity::conversion;
use crate::error::ExplorerError;
use crate::escrow::Escrow;
use crate::store::core::StoreContext;
use crate::store::domains::pool_store::CasOutcome;

/// Minimum runway a pool must offer before a workload is admitted.
pub const MIN_CAPACITY_SECONDS: i64 = 120;

/// Bounded retries for compare-and-set updates racing other writers.
const CAS_ATTEMPTS: usize = 10;

fn store_err(err: anyhow::Error) -> ExplorerError {
    ExplorerError::StoreTransient(err.to_string())
}

/// After a funding event, workloads parked in `Pay` get another admission
/// try; the ones that now fit go out through the node queues.
pub async fn promote_funded_pool(store: &Arc<StoreContext>, pool_id: i64) -> anyhow::Result<()> {
    let Some(pool) = store.pool_store.get(pool_id).await? else {
        anyhow::bail!("pool {} does not exist", pool_id);
    };

    let workloads = store.workload_store.list_for_pool(pool_id).await?;
    let now = Utc::now().timestamp();
    for workload in workloads {
        if workload.info.next_action != NextAction::Pay {
            continue;
        }
        let Ok(units) = conversion::cloud_units_for(&workload) else {
            continue;
        };
        if !units.is_zero() && pool.runway_with(&units, now) < MIN_CAPACITY_SECONDS {
            continue;
        }
        if store
            .workload_store
            .set_next_action(workload.info.id, NextAction::Pay, NextAction::Deploy)
            .await?
            == CasOutcome::Written
        {
            debug!("workload {} admitted after pool re-funding", workload.info.id);
            store
                .queue_store
                .push(&workload.info.node_id, workload.info.id)
                .await?;
        }
    }
    Ok(())
}

/// Admission control and time-integrated pool accounting. The only writer
/// of pool balances besides escrow funding.
pub struct CapacityPlanner {
    store: Arc<StoreContext>,
    escrow: Arc<dyn Escrow>,
    policy: GridPolicy,
}

impl CapacityPlanner {
    pub fn new(store: Arc<StoreContext>, escrow: Arc<dyn Escrow>, policy: GridPolicy) -> Self {
        Self {
            store,
            escrow,
            policy,
        }
    }

    pub async fn pool_by_id(&self, pool_id: i64) -> Result<Pool, ExplorerError> {
        self.store
            .pool_store
            .get(pool_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| ExplorerError::NotFound(format!("pool {} does not exist", pool_id)))
    }

    pub async fn pools_for_owner(&self, owner: i64) -> Result<Vec<Pool>, ExplorerError> {
        self.store
            .pool_store
            .pools_for_owner(owner)
            .await
            .map_err(store_err)
    }

    /// The workload may only deploy when its node is part of the pool and
    /// the pool belongs to the workload's customer.
    pub async fn is_allowed(&self, workload: &Workload) -> Result<bool, ExplorerError> {
        let pool = self.pool_by_id(workload.info.pool_id).await?;
        Ok(pool.customer_tid == workload.info.customer_tid
            && pool.node_ids.contains(&workload.info.node_id))
    }

    /// Whether the pool can sustain the workload for at least `min_seconds`.
    pub async fn has_capacity(
        &self,
        workload: &Workload,
        min_seconds: i64,
    ) -> Result<bool, ExplorerError> {
        let pool = self.pool_by_id(workload.info.pool_id).await?;
        let units =
            conversion::cloud_units_for(workload).map_err(|e| ExplorerError::Validation(e.to_string()))?;
        if units.is_zero() {
            return Ok(true);
        }
        Ok(pool.runway_with(&units, Utc::now().timestamp()) >= min_seconds)
    }

    pub async fn add_used_capacity(&self, workload: &Workload) -> Result<(), ExplorerError> {
        self.apply_usage(workload, true).await
    }

    pub async fn remove_used_capacity(&self, workload: &Workload) -> Result<(), ExplorerError> {
        self.apply_usage(workload, false).await
    }

    async fn apply_usage(&self, workload: &Workload, add: bool) -> Result<(), ExplorerError> {
        let units = conversion::cloud_units_for(workload)
            .map_err(|e| ExplorerError::Validation(e.to_string()))?;
        if units.is_zero() {
            return Ok(());
        }

        for _ in 0..CAS_ATTEMPTS {
            let mut pool = self.pool_by_id(workload.info.pool_id).await?;
            let expected = pool.last_updated;
            let now = Utc::now().timestamp();
            if add {
                pool.add_workload(workload.info.id, &units, now);
            } else {
                pool.remove_workload(workload.info.id, &units, now);
            }

            match self
                .store
                .pool_store
                .update_cas(&pool, expected)
                .await
                .map_err(store_err)?
            {
                CasOutcome::Written => return Ok(()),
                CasOutcome::Stale => continue,
                CasOutcome::Missing => {
                    return Err(ExplorerError::NotFound(format!(
                        "pool {} disappeared",
                        pool.pool_id
                    )))
                }
            }
        }

        Err(ExplorerError::StoreTransient(format!(
            "pool {} update kept racing, giving up",
            workload.info.pool_id
        )))
    }

    /// Create or extend a capacity pool and hand the reservation to escrow.
    /// Extension may only grow the node set; shrinking it silently would
    /// strand deployed workloads.
    pub async fn reserve(
        &self,
        mut reservation: CapacityReservation,
        currencies: Vec<String>,
    ) -> Result<(i64, CustomerCapacityEscrowInformation), ExplorerError> {
        let data = reservation.data_reservation.clone();

        let nodes = self
            .store
            .node_store
            .get_valid_targets(&data.node_ids)
            .await
            .map_err(|e| ExplorerError::Validation(e.to_string()))?;
        let all_free_to_use = nodes.iter().all(|n| n.free_to_use);

        if data.pool_id > 0 {
            let pool = self.pool_by_id(data.pool_id).await?;
            if pool.customer_tid != reservation.customer_tid {
                return Err(ExplorerError::Forbidden(
                    "only the pool owner can extend a pool".to_string(),
                ));
            }
            for node_id in &pool.node_ids {
                if !data.node_ids.contains(node_id) {
                    return Err(ExplorerError::Validation(
                        "transparent capacity extension cannot remove nodes from a pool"
                            .to_string(),
                    ));
                }
            }
            reservation.id = self.store.pool_store.next_id().await.map_err(store_err)?;
        } else {
            let pool_id = self.store.pool_store.next_id().await.map_err(store_err)?;
            reservation.id = pool_id;
            reservation.data_reservation.pool_id = pool_id;
            let pool = Pool::new(
                pool_id,
                reservation.customer_tid,
                data.node_ids.clone(),
                Utc::now().timestamp(),
            );
            self.store.pool_store.insert(&pool).await.map_err(store_err)?;
        }

        // FreeTFT cannot be used unless every node is free to use
        let currencies: Vec<String> = currencies
            .into_iter()
            .filter(|c| c != FREE_TFT_CODE || all_free_to_use)
            .collect();

        let info = self
            .escrow
            .reserve_capacity(&reservation, currencies, all_free_to_use)
            .await?;
        Ok((reservation.id, info))
    }

    /// Background expiry sweep: pools that ran dry get their balances
    /// zeroed and every live workload headed for teardown. Idempotent.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut ticker = interval(Duration::from_secs(self.policy.sweep_interval));
        info!(
            "capacity expiry sweep running every {}s",
            self.policy.sweep_interval
        );

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!("capacity sweep failed: {e}");
            }
        }
    }

    pub async fn sweep_once(&self) -> anyhow::Result<()> {
        let now = Utc::now().timestamp();
        let pools = self.store.pool_store.list().await?;

        for pool in pools {
            if pool.empty_at > now {
                continue;
            }
            debug!("pool {} ran dry, tearing down workloads", pool.pool_id);

            let expected = pool.last_updated;
            let mut drained = pool.clone();
            drained.settle(now);
            drained.cus = 0.0;
            drained.sus = 0.0;
            drained.nus = 0.0;
            drained.ipv4us = 0.0;
            drained.recompute_empty_at();

            // losing the race just means another sweep got here first
            if self
                .store
                .pool_store
                .update_cas(&drained, expected)
                .await?
                != CasOutcome::Written
            {
                continue;
            }

            let workloads = self
                .store
                .workload_store
                .list_for_pool(pool.pool_id)
                .await?;
            for workload in workloads {
                let current = workload.info.next_action;
                if !matches!(
                    current,
                    NextAction::Deploy | NextAction::Sign | NextAction::Pay
                ) {
                    continue;
                }
                match self
                    .store
                    .workload_store
                    .set_next_action(workload.info.id, current, NextAction::Delete)
                    .await
                {
                    // re-deliver: the node's poll cursor is already past
                    // this id
                    Ok(CasOutcome::Written) => {
                        if let Err(e) = self
                            .store
                            .queue_store
                            .push(&workload.info.node_id, workload.info.id)
                            .await
                        {
                            error!(
                                "failed to queue workload {} for teardown: {e}",
                                workload.info.id
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(
                            "failed to schedule workload {} for deletion: {e}",
                            workload.info.id
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::helper::create_test_app_state;
    use shared::models::node::Node;
    use shared::models::pool::CapacityReservationData;
    use shared::models::workload::{
        ReservationInfo, Volume, VolumeType, WorkloadData, WorkloadType,
    };
    use std::time::Duration;
    use tokio::time::sleep;

    async fn seed_nodes(state: &crate::api::server::AppState) -> Vec<String> {
        let mut node_ids = Vec::new();
        for name in ["node-1", "node-2"] {
            let node = state
                .store_context
                .node_store
                .upsert(Node {
                    node_id: name.to_string(),
                    farm_id: 7,
                    ..Default::default()
                })
                .await
                .unwrap();
            node_ids.push(node.node_id);
        }
        node_ids
    }

    async fn reserve(
        state: &crate::api::server::AppState,
        owner: i64,
        data: CapacityReservationData,
    ) -> Result<(i64, shared::models::escrow::CustomerCapacityEscrowInformation), ExplorerError>
    {
        let reservation = CapacityReservation {
            json: serde_json::to_string(&data).unwrap(),
            data_reservation: data,
            customer_tid: owner,
            ..Default::default()
        };
        state
            .planner
            .reserve(reservation, vec!["TFT".to_string()])
            .await
    }

    fn volume(pool_id: i64, node_id: &str, size: i64) -> Workload {
        Workload {
            info: ReservationInfo {
                id: 0,
                node_id: node_id.to_string(),
                pool_id,
                customer_tid: 42,
                next_action: NextAction::Deploy,
                workload_type: WorkloadType::Volume,
                ..Default::default()
            },
            data: WorkloadData::Volume(Volume {
                size,
                kind: VolumeType::Ssd,
            }),
        }
    }

    #[tokio::test]
    #[ignore = "requires a local redis instance"]
    async fn add_then_remove_restores_the_rates() {
        let state = create_test_app_state().await;
        let node_ids = seed_nodes(&state).await;
        let (pool_id, _) = reserve(
            &state,
            42,
            CapacityReservationData {
                cus: 36_000,
                sus: 36_000,
                node_ids: node_ids.clone(),
                currencies: vec!["TFT".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let mut workload = volume(pool_id, &node_ids[0], 100);
        workload = state
            .store_context
            .workload_store
            .create(workload)
            .await
            .unwrap();

        state.planner.add_used_capacity(&workload).await.unwrap();
        let pool = state.planner.pool_by_id(pool_id).await.unwrap();
        assert_eq!(pool.active_su, 0.5);
        assert!(pool.empty_at < i64::MAX);

        state.planner.remove_used_capacity(&workload).await.unwrap();
        let pool = state.planner.pool_by_id(pool_id).await.unwrap();
        assert_eq!(pool.active_su, 0.0);
        assert_eq!(pool.empty_at, i64::MAX);
    }

    #[tokio::test]
    #[ignore = "requires a local redis instance"]
    async fn extension_cannot_drop_nodes() {
        let state = create_test_app_state().await;
        let node_ids = seed_nodes(&state).await;
        let (pool_id, _) = reserve(
            &state,
            42,
            CapacityReservationData {
                cus: 100,
                sus: 100,
                node_ids: node_ids.clone(),
                currencies: vec!["TFT".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let shrunk = CapacityReservationData {
            pool_id,
            cus: 100,
            sus: 100,
            node_ids: vec![node_ids[0].clone()],
            currencies: vec!["TFT".to_string()],
            ..Default::default()
        };
        let err = reserve(&state, 42, shrunk).await.unwrap_err();
        assert!(matches!(err, ExplorerError::Validation(_)));

        // growing the node set is a legal extension
        let node3 = state
            .store_context
            .node_store
            .upsert(Node {
                node_id: "node-3".to_string(),
                farm_id: 7,
                ..Default::default()
            })
            .await
            .unwrap();
        let mut grown_nodes = node_ids.clone();
        grown_nodes.push(node3.node_id);
        let grown = CapacityReservationData {
            pool_id,
            cus: 100,
            sus: 100,
            node_ids: grown_nodes.clone(),
            currencies: vec!["TFT".to_string()],
            ..Default::default()
        };
        reserve(&state, 42, grown).await.unwrap();

        let pool = state.planner.pool_by_id(pool_id).await.unwrap();
        assert_eq!(pool.node_ids, grown_nodes);
        assert_eq!(pool.cus, 200.0);
    }

    #[tokio::test]
    #[ignore = "requires a local redis instance"]
    async fn sweep_tears_down_an_emptied_pool() {
        let state = create_test_app_state().await;
        let node_ids = seed_nodes(&state).await;
        // 1 su-second of budget only
        let (pool_id, _) = reserve(
            &state,
            42,
            CapacityReservationData {
                cus: 0,
                sus: 1,
                node_ids: node_ids.clone(),
                currencies: vec!["TFT".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let workload = state
            .store_context
            .workload_store
            .create(volume(pool_id, &node_ids[0], 200))
            .await
            .unwrap();
        state.planner.add_used_capacity(&workload).await.unwrap();

        sleep(Duration::from_secs(2)).await;

        state.planner.sweep_once().await.unwrap();
        let pool = state.planner.pool_by_id(pool_id).await.unwrap();
        assert_eq!(pool.sus, 0.0);

        let stored = state
            .store_context
            .workload_store
            .get(workload.info.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.info.next_action, NextAction::Delete);

        // the teardown is re-delivered through the node queue
        let queued = state
            .store_context
            .queue_store
            .list(&node_ids[0], 10)
            .await
            .unwrap();
        assert_eq!(queued, vec![workload.info.id]);

        // a second sweep with nothing new to do changes nothing
        let before = state.planner.pool_by_id(pool_id).await.unwrap();
        state.planner.sweep_once().await.unwrap();
        let after = state.planner.pool_by_id(pool_id).await.unwrap();
        assert_eq!(before.cus, after.cus);
        assert_eq!(before.sus, after.sus);
        assert_eq!(before.active_su, after.active_su);
    }
}

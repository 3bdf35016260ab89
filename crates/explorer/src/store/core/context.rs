use std::sync::Arc;

use crate::store::core::RedisStore;
use crate::store::domains::escrow_store::EscrowStore;
use crate::store::domains::farm_store::FarmStore;
use crate::store::domains::node_store::NodeStore;
use crate::store::domains::pool_store::PoolStore;
use crate::store::domains::queue_store::QueueStore;
use crate::store::domains::user_store::UserStore;
use crate::store::domains::workload_store::WorkloadStore;

pub struct StoreContext {
    pub user_store: Arc<UserStore>,
    pub farm_store: Arc<FarmStore>,
    pub node_store: Arc<NodeStore>,
    pub pool_store: Arc<PoolStore>,
    pub workload_store: Arc<WorkloadStore>,
    pub queue_store: Arc<QueueStore>,
    pub escrow_store: Arc<EscrowStore>,
}

impl StoreContext {
    pub fn new(store: Arc<RedisStore>) -> Self {
        Self {
            user_store: Arc::new(UserStore::new(store.clone())),
            farm_store: Arc::new(FarmStore::new(store.clone())),
            node_store: Arc::new(NodeStore::new(store.clone())),
            pool_store: Arc::new(PoolStore::new(store.clone())),
            workload_store: Arc::new(WorkloadStore::new(store.clone())),
            queue_store: Arc::new(QueueStore::new(store.clone())),
            escrow_store: Arc::new(EscrowStore::new(store.clone())),
        }
    }
}

pub mod escrow_store;
pub mod farm_store;
pub mod node_store;
pub mod pool_store;
pub mod queue_store;
pub mod user_store;
pub mod workload_store;

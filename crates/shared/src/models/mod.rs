pub mod escrow;
pub mod farm;
pub mod node;
pub mod pool;
pub mod user;
pub mod workload;

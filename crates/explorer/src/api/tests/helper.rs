use std::sync::Arc;

use actix_web::web::Data;
use shared::gridnetwork::{GridNetwork, GridPolicy};

use crate::api::server::AppState;
use crate::capacity::CapacityPlanner;
use crate::escrow::FreeEscrow;
use crate::store::core::{RedisStore, StoreContext};

/// Fresh app state against the test redis instance, flushed. Tests using
/// this require a reachable redis and are `#[ignore]`d by default.
pub async fn create_test_app_state() -> Data<AppState> {
    let store = Arc::new(RedisStore::new_test());
    let mut con = store
        .client
        .get_connection()
        .expect("Should connect to test Redis instance");

    redis::cmd("PING")
        .query::<String>(&mut con)
        .expect("Redis should be responsive");
    redis::cmd("FLUSHDB")
        .query::<String>(&mut con)
        .expect("Redis should be flushed");

    let store_context = Arc::new(StoreContext::new(store.clone()));
    let policy = GridPolicy::new(GridNetwork::Testnet, String::new());
    let escrow = Arc::new(FreeEscrow::new(store_context.clone()));
    let planner = Arc::new(CapacityPlanner::new(
        store_context.clone(),
        escrow.clone(),
        policy.clone(),
    ));

    Data::new(AppState {
        store_context,
        planner,
        escrow,
        policy,
    })
}

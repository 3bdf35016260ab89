pub mod farms;
pub mod nodes;
pub mod pools;
pub mod users;
pub mod workloads;

use crate::error::ExplorerError;

pub(crate) fn store_err(err: anyhow::Error) -> ExplorerError {
    ExplorerError::StoreTransient(err.to_string())
}

use actix_web::web::{self, get, post, Data};
use actix_web::{HttpResponse, Scope};
use serde_json::json;
use shared::models::node::Node;

use crate::api::routes::store_err;
use crate::api::server::AppState;
use crate::api::Signer;
use crate::error::ExplorerError;

type Result<T> = std::result::Result<T, ExplorerError>;

#[utoipa::path(
    post,
    path = "/nodes",
    responses(
        (status = 201, description = "Node registered or refreshed"),
        (status = 403, description = "Caller does not own the node's farm")
    ),
    tag = "directory"
)]
async fn register_node(
    signer: Signer,
    body: web::Json<Node>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let node = body.into_inner();
    node.validate()
        .map_err(|e| ExplorerError::Validation(e.to_string()))?;

    let farm = app_state
        .store_context
        .farm_store
        .get(node.farm_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::NotFound(format!("farm {} not found", node.farm_id)))?;
    if farm.threebot_id != signer.0 {
        return Err(ExplorerError::Forbidden(
            "only the farm owner can register nodes".to_string(),
        ));
    }

    let node = app_state
        .store_context
        .node_store
        .upsert(node)
        .await
        .map_err(store_err)?;
    Ok(HttpResponse::Created().json(json!({ "id": node.id })))
}

#[utoipa::path(
    get,
    path = "/nodes",
    responses((status = 200, description = "All registered nodes")),
    tag = "directory"
)]
async fn list_nodes(app_state: Data<AppState>) -> Result<HttpResponse> {
    let nodes = app_state
        .store_context
        .node_store
        .list()
        .await
        .map_err(store_err)?;
    Ok(HttpResponse::Ok().json(nodes))
}

#[utoipa::path(
    get,
    path = "/nodes/{node_id}",
    responses(
        (status = 200, description = "The node"),
        (status = 404, description = "Unknown node id")
    ),
    tag = "directory"
)]
async fn get_node(node_id: web::Path<String>, app_state: Data<AppState>) -> Result<HttpResponse> {
    let node_id = node_id.into_inner();
    let node = app_state
        .store_context
        .node_store
        .get(&node_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::NotFound(format!("node {} not found", node_id)))?;
    Ok(HttpResponse::Ok().json(node))
}

pub fn nodes_routes() -> Scope {
    web::scope("/nodes")
        .route("", post().to(register_node))
        .route("", get().to(list_nodes))
        .route("/{node_id}", get().to(get_node))
}

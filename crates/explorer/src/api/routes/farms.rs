use actix_web::web::{self, delete, get, post, Data, ReqData};
use actix_web::{HttpResponse, Scope};
use serde_json::json;
use shared::models::farm::{Farm, FarmPublicIp};
use shared::security::auth_signature_middleware::SignerId;

use crate::api::routes::store_err;
use crate::api::server::AppState;
use crate::api::Signer;
use crate::error::ExplorerError;
use crate::store::domains::farm_store::IpSwapOutcome;

type Result<T> = std::result::Result<T, ExplorerError>;

async fn owned_farm(app_state: &AppState, farm_id: i64, caller: i64) -> Result<Farm> {
    let farm = app_state
        .store_context
        .farm_store
        .get(farm_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::NotFound(format!("farm {} not found", farm_id)))?;
    if farm.threebot_id != caller {
        return Err(ExplorerError::Forbidden(
            "only the farm owner can manage this farm".to_string(),
        ));
    }
    Ok(farm)
}

#[utoipa::path(
    post,
    path = "/farms",
    responses(
        (status = 201, description = "Farm registered"),
        (status = 400, description = "Invalid farm document")
    ),
    tag = "directory"
)]
async fn register_farm(
    signer: Signer,
    body: web::Json<Farm>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let farm = body.into_inner();
    farm.validate()
        .map_err(|e| ExplorerError::Validation(e.to_string()))?;
    signer.require(farm.threebot_id)?;

    let farm = app_state
        .store_context
        .farm_store
        .create(farm)
        .await
        .map_err(store_err)?;
    Ok(HttpResponse::Created().json(json!({ "id": farm.id })))
}

#[utoipa::path(
    get,
    path = "/farms",
    responses((status = 200, description = "All registered farms")),
    tag = "directory"
)]
async fn list_farms(app_state: Data<AppState>) -> Result<HttpResponse> {
    let farms = app_state
        .store_context
        .farm_store
        .list()
        .await
        .map_err(store_err)?;
    Ok(HttpResponse::Ok().json(farms))
}

#[utoipa::path(
    get,
    path = "/farms/{farm_id}",
    responses(
        (status = 200, description = "The farm, IP bindings included"),
        (status = 404, description = "Unknown farm id")
    ),
    tag = "directory"
)]
async fn get_farm(farm_id: web::Path<i64>, app_state: Data<AppState>) -> Result<HttpResponse> {
    let id = farm_id.into_inner();
    let farm = app_state
        .store_context
        .farm_store
        .get(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::NotFound(format!("farm {} not found", id)))?;
    Ok(HttpResponse::Ok().json(farm))
}

#[utoipa::path(
    post,
    path = "/farms/{farm_id}/ips",
    responses(
        (status = 200, description = "Addresses added to the farm"),
        (status = 400, description = "Malformed address or gateway"),
        (status = 403, description = "Caller does not own the farm")
    ),
    tag = "directory"
)]
async fn add_farm_ips(
    signer: ReqData<SignerId>,
    farm_id: web::Path<i64>,
    body: web::Json<Vec<FarmPublicIp>>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let farm_id = farm_id.into_inner();
    owned_farm(&app_state, farm_id, signer.0).await?;

    let ips = body.into_inner();
    for ip in &ips {
        ip.validate()
            .map_err(|e| ExplorerError::Validation(e.to_string()))?;
    }

    app_state
        .store_context
        .farm_store
        .add_ips(farm_id, ips)
        .await
        .map_err(store_err)?;
    Ok(HttpResponse::Ok().json(json!({})))
}

#[utoipa::path(
    delete,
    path = "/farms/{farm_id}/ips",
    responses(
        (status = 200, description = "Addresses removed from the farm"),
        (status = 403, description = "Caller does not own the farm"),
        (status = 409, description = "An address is still reserved")
    ),
    tag = "directory"
)]
async fn delete_farm_ips(
    signer: ReqData<SignerId>,
    farm_id: web::Path<i64>,
    body: web::Json<Vec<String>>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let farm_id = farm_id.into_inner();
    owned_farm(&app_state, farm_id, signer.0).await?;

    for address in body.into_inner() {
        match app_state
            .store_context
            .farm_store
            .remove_ip(farm_id, &address)
            .await
            .map_err(store_err)?
        {
            IpSwapOutcome::Swapped => {}
            IpSwapOutcome::Conflict => {
                return Err(ExplorerError::Conflict(format!(
                    "address {} is still reserved",
                    address
                )))
            }
            IpSwapOutcome::NotFound => {
                return Err(ExplorerError::NotFound(format!(
                    "address {} is not part of this farm",
                    address
                )))
            }
        }
    }
    Ok(HttpResponse::Ok().json(json!({})))
}

pub fn farms_routes() -> Scope {
    web::scope("/farms")
        .route("", post().to(register_farm))
        .route("", get().to(list_farms))
        .route("/{farm_id:\\d+}", get().to(get_farm))
}

/// Mounted separately so the whole scope can sit behind the signature
/// middleware.
pub fn farm_ips_routes() -> Scope {
    web::scope("/farms/{farm_id:\\d+}/ips")
        .route("", post().to(add_farm_ips))
        .route("", delete().to(delete_farm_ips))
}

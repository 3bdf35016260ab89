use std::collections::HashSet;

use actix_web::web::{self, get, post, Data};
use actix_web::{HttpResponse, Scope};
use serde_json::json;
use shared::models::pool::CapacityReservation;

use crate::api::routes::store_err;
use crate::api::server::AppState;
use crate::api::Signer;
use crate::error::ExplorerError;
use crate::escrow::Escrow as _;

type Result<T> = std::result::Result<T, ExplorerError>;

#[utoipa::path(
    post,
    path = "/reservations/pools",
    responses(
        (status = 201, description = "Pool reserved, escrow information returned"),
        (status = 400, description = "Validation or signature failure"),
        (status = 409, description = "Duplicate node in pool")
    ),
    tag = "pools"
)]
async fn setup_pool(
    signer: Signer,
    body: web::Json<CapacityReservation>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let reservation = body.into_inner();
    reservation
        .validate()
        .map_err(|e| ExplorerError::Validation(e.to_string()))?;
    signer.require(reservation.customer_tid)?;

    let data = &reservation.data_reservation;
    let mut seen = HashSet::new();
    for node_id in &data.node_ids {
        if !seen.insert(node_id) {
            return Err(ExplorerError::Conflict(
                "duplicate node ID is not allowed in capacity pool".to_string(),
            ));
        }
    }

    let nodes = app_state
        .store_context
        .node_store
        .get_valid_targets(&data.node_ids)
        .await
        .map_err(|e| ExplorerError::Validation(e.to_string()))?;
    let farms: HashSet<i64> = nodes.iter().map(|n| n.farm_id).collect();
    if farms.len() > 1 {
        return Err(ExplorerError::Validation(
            "all nodes for a capacity pool must belong to the same farm".to_string(),
        ));
    }

    let user = app_state
        .store_context
        .user_store
        .get(reservation.customer_tid)
        .await
        .map_err(store_err)?
        .ok_or_else(|| {
            ExplorerError::Validation(format!(
                "cannot find user with id '{}'",
                reservation.customer_tid
            ))
        })?;
    reservation.verify(&user.pubkey).map_err(|e| {
        ExplorerError::Validation(format!("failed to verify customer signature: {}", e))
    })?;

    if reservation.sponsor_tid != 0 {
        if reservation.sponsor_signature.is_empty() {
            return Err(ExplorerError::Validation(
                "cannot use sponsor_tid without providing sponsor_signature".to_string(),
            ));
        }
        let sponsor = app_state
            .store_context
            .user_store
            .get(reservation.sponsor_tid)
            .await
            .map_err(store_err)?
            .ok_or_else(|| {
                ExplorerError::Validation(format!(
                    "cannot find sponsor with id '{}'",
                    reservation.sponsor_tid
                ))
            })?;
        if !sponsor.is_trusted_channel {
            return Err(ExplorerError::Unauthenticated(format!(
                "the sponsor tid '{}' is not authorized",
                reservation.sponsor_tid
            )));
        }
        reservation.verify_sponsor(&sponsor.pubkey).map_err(|e| {
            ExplorerError::Validation(format!("failed to verify sponsor signature: {}", e))
        })?;
    }

    let currencies = data.currencies.clone();
    let (reservation_id, info) = app_state.planner.reserve(reservation, currencies).await?;

    Ok(HttpResponse::Created().json(json!({
        "reservation_id": reservation_id,
        "escrow_information": info,
    })))
}

#[utoipa::path(
    get,
    path = "/reservations/pools/{id}",
    responses(
        (status = 200, description = "Pool status"),
        (status = 404, description = "Unknown pool")
    ),
    tag = "pools"
)]
async fn get_pool(id: web::Path<i64>, app_state: Data<AppState>) -> Result<HttpResponse> {
    let pool = app_state.planner.pool_by_id(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(pool))
}

#[utoipa::path(
    get,
    path = "/reservations/pools/owner/{owner}",
    responses((status = 200, description = "Pools of this owner")),
    tag = "pools"
)]
async fn list_pools(owner: web::Path<i64>, app_state: Data<AppState>) -> Result<HttpResponse> {
    let pools = app_state.planner.pools_for_owner(owner.into_inner()).await?;
    Ok(HttpResponse::Ok().json(pools))
}

#[utoipa::path(
    get,
    path = "/reservations/pools/{id}/payment",
    responses(
        (status = 200, description = "Payment state for this reservation"),
        (status = 404, description = "No payment known for this reservation")
    ),
    tag = "pools"
)]
async fn get_payment_info(id: web::Path<i64>, app_state: Data<AppState>) -> Result<HttpResponse> {
    let id = id.into_inner();
    let payment = app_state
        .store_context
        .escrow_store
        .payment(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::NotFound(format!("no payment for reservation {}", id)))?;
    Ok(HttpResponse::Ok().json(payment))
}

#[utoipa::path(
    post,
    path = "/reservations/pools/{id}/cancel",
    responses(
        (status = 200, description = "Reservation canceled, funds refunded"),
        (status = 403, description = "Caller does not own the reservation"),
        (status = 409, description = "Reservation already settled")
    ),
    tag = "pools"
)]
async fn cancel_pool_reservation(
    signer: Signer,
    id: web::Path<i64>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let id = id.into_inner();
    let payment = app_state
        .store_context
        .escrow_store
        .payment(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::NotFound(format!("no payment for reservation {}", id)))?;
    if payment.customer_tid != signer.0 {
        return Err(ExplorerError::Forbidden(
            "only the reservation owner can cancel it".to_string(),
        ));
    }

    app_state.escrow.cancel_reservation(id).await?;
    Ok(HttpResponse::Ok().json(json!({})))
}

pub fn pools_routes() -> Scope {
    web::scope("/pools")
        .route("", post().to(setup_pool))
        .route("/owner/{owner:\\d+}", get().to(list_pools))
        .route("/{id:\\d+}", get().to(get_pool))
        .route("/{id:\\d+}/payment", get().to(get_payment_info))
        .route("/{id:\\d+}/cancel", post().to(cancel_pool_reservation))
}

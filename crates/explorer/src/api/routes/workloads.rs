use actix_web::web::{self, delete, get, post, put, Data};
use actix_web::{HttpResponse, Scope};
use chrono::Utc;
use log::{debug, error};
use serde::Deserialize;
use serde_json::json;
use shared::models::workload::{
    K8sCustomSize, NextAction, ResultState, SigningSignature, Workload, WorkloadData,
    WorkloadResult, CUSTOM_SIZE, CUSTOM_SIZE_SRU, WORKLOAD_VERSION,
};

use crate::api::routes::{pools::pools_routes, store_err};
use crate::api::server::AppState;
use crate::api::Signer;
use crate::capacity::planner::MIN_CAPACITY_SECONDS;
use crate::error::ExplorerError;
use crate::pipeline;
use crate::store::domains::farm_store::IpSwapOutcome;
use crate::store::domains::pool_store::CasOutcome;

/// Upper bound on one node-poll page.
const MAX_PAGE_SIZE: usize = 200;

const SIGN_CAS_ATTEMPTS: usize = 10;

type Result<T> = std::result::Result<T, ExplorerError>;

fn parse_gwid(gwid: &str) -> Result<i64> {
    gwid.split('-')
        .next()
        .and_then(|part| part.parse::<i64>().ok())
        .ok_or_else(|| ExplorerError::Validation("invalid workload id part".to_string()))
}

async fn load_workload(app_state: &AppState, id: i64) -> Result<Workload> {
    app_state
        .store_context
        .workload_store
        .get(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::NotFound(format!("workload {} not found", id)))
}

/// Bind a custom-sized cluster member or VM to the residual capacity of its
/// target node.
async fn bind_custom_size(app_state: &AppState, workload: &mut Workload) -> Result<()> {
    let (size, custom_size) = match &mut workload.data {
        WorkloadData::Kubernetes(k8s) => (k8s.size, &mut k8s.custom_size),
        WorkloadData::VirtualMachine(vm) => (vm.size, &mut vm.custom_size),
        _ => return Ok(()),
    };

    // reset whatever the customer put there, the explorer owns this field
    *custom_size = K8sCustomSize::default();
    if size != CUSTOM_SIZE {
        return Ok(());
    }

    let node = app_state
        .store_context
        .node_store
        .get(&workload.info.node_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| {
            ExplorerError::NotFound(format!("node {} not found", workload.info.node_id))
        })?;

    let residual = node.residual_resources();
    if residual.cru == 0 || residual.mru <= 0.0 {
        return Err(ExplorerError::Conflict(
            "selected node does not have enough resources".to_string(),
        ));
    }

    *custom_size = K8sCustomSize {
        cru: residual.cru as i64,
        mru: residual.mru,
        sru: CUSTOM_SIZE_SRU,
    };
    Ok(())
}

/// A kubernetes/VM workload may only attach a PublicIP workload that is
/// deployed, owned by the same customer, and not already attached elsewhere.
async fn check_public_ip_attachment(
    app_state: &AppState,
    workload: &Workload,
) -> Result<()> {
    let public_ip = workload.public_ip_ref();
    if public_ip == 0 {
        return Ok(());
    }

    let ip_workload = load_workload(app_state, public_ip)
        .await
        .map_err(|_| ExplorerError::NotFound(format!("ip workload '{}' not found", public_ip)))?;
    let deployed_public_ip = matches!(ip_workload.data, WorkloadData::PublicIp(_))
        && ip_workload.info.next_action == NextAction::Deploy
        && ip_workload.info.customer_tid == workload.info.customer_tid;
    if !deployed_public_ip {
        return Err(ExplorerError::NotFound(format!(
            "ip workload '{}' not found",
            public_ip
        )));
    }

    let holders = app_state
        .store_context
        .workload_store
        .referencing_public_ip(public_ip, &[NextAction::Deploy])
        .await
        .map_err(store_err)?;
    if !holders.is_empty() {
        return Err(ExplorerError::Conflict("public ip is in use".to_string()));
    }
    Ok(())
}

/// Claim the farm address for a PublicIP workload, swapping out a previous
/// reservation by the same customer if there is one.
async fn handle_public_ip_reservation(
    app_state: &AppState,
    workload: &Workload,
) -> Result<()> {
    let WorkloadData::PublicIp(ip) = &workload.data else {
        return Ok(());
    };

    let node = app_state
        .store_context
        .node_store
        .get(&workload.info.node_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| {
            ExplorerError::Validation("failed to retrieve node for ip".to_string())
        })?;
    let farm = app_state
        .store_context
        .farm_store
        .get(node.farm_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::Validation("failed to retrieve farm".to_string()))?;

    let entry = farm
        .ip_entry(&ip.ipaddress)
        .ok_or_else(|| ExplorerError::NotFound("public ip not found in farm".to_string()))?;

    let swap = entry.reservation_id;
    if swap != 0 {
        // the address is held; only the same customer may take it over
        let holder = load_workload(app_state, swap)
            .await
            .map_err(|_| ExplorerError::Conflict("ip address already in use".to_string()))?;
        if holder.info.customer_tid != workload.info.customer_tid
            || holder.info.next_action != NextAction::Deploy
        {
            return Err(ExplorerError::Conflict(
                "ip address already in use".to_string(),
            ));
        }

        if app_state
            .store_context
            .workload_store
            .set_next_action(swap, NextAction::Deploy, NextAction::Delete)
            .await
            .map_err(store_err)?
            == CasOutcome::Written
        {
            app_state
                .store_context
                .queue_store
                .push(&holder.info.node_id, swap)
                .await
                .map_err(store_err)?;
        }
    }

    match app_state
        .store_context
        .farm_store
        .ip_swap(farm.id, &entry.address, swap, workload.info.id)
        .await
        .map_err(store_err)?
    {
        IpSwapOutcome::Swapped => Ok(()),
        IpSwapOutcome::Conflict => Err(ExplorerError::Conflict(
            "ip address already in use".to_string(),
        )),
        IpSwapOutcome::NotFound => {
            Err(ExplorerError::NotFound("public ip not found in farm".to_string()))
        }
    }
}

/// Free the farm address held by a PublicIP workload.
async fn release_public_ip(app_state: &AppState, workload: &Workload) -> Result<()> {
    let WorkloadData::PublicIp(ip) = &workload.data else {
        return Ok(());
    };

    let Some(node) = app_state
        .store_context
        .node_store
        .get(&workload.info.node_id)
        .await
        .map_err(store_err)?
    else {
        return Ok(());
    };
    let Some(farm) = app_state
        .store_context
        .farm_store
        .get(node.farm_id)
        .await
        .map_err(store_err)?
    else {
        return Ok(());
    };

    if let Some(entry) = farm.ip_entry(&ip.ipaddress) {
        let _ = app_state
            .store_context
            .farm_store
            .ip_release(farm.id, &entry.address, workload.info.id)
            .await
            .map_err(store_err)?;
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/reservations",
    responses(
        (status = 201, description = "Workload accepted and scheduled"),
        (status = 400, description = "Validation or signature failure"),
        (status = 402, description = "Pool lacks capacity, workload stored invalid"),
        (status = 403, description = "Node or customer not allowed on this pool")
    ),
    tag = "workloads"
)]
async fn create_workload(
    signer: Signer,
    body: web::Json<Workload>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let mut workload = body.into_inner();

    // server-owned fields, whatever the client sent
    workload.info.id = 0;
    workload.info.signatures_provision = Vec::new();
    workload.info.signatures_delete = Vec::new();
    workload.info.result = None;
    workload.info.version = WORKLOAD_VERSION;
    workload.info.next_action = NextAction::Create;

    workload
        .validate()
        .map_err(|e| ExplorerError::Validation(e.to_string()))?;
    signer.require(workload.info.customer_tid)?;

    let user = app_state
        .store_context
        .user_store
        .get(workload.info.customer_tid)
        .await
        .map_err(store_err)?
        .ok_or_else(|| {
            ExplorerError::Validation(format!(
                "cannot find user with id '{}'",
                workload.info.customer_tid
            ))
        })?;
    workload
        .verify_customer(&user.pubkey)
        .map_err(|e| ExplorerError::Validation(format!("failed to verify customer signature: {}", e)))?;

    workload.info.epoch = Utc::now().timestamp();

    if !app_state.planner.is_allowed(&workload).await? {
        return Err(ExplorerError::Forbidden(
            "not allowed to deploy workload on this pool".to_string(),
        ));
    }

    bind_custom_size(&app_state, &mut workload).await?;
    check_public_ip_attachment(&app_state, &workload).await?;

    pipeline::progress(&mut workload);

    let workload = app_state
        .store_context
        .workload_store
        .create(workload)
        .await
        .map_err(store_err)?;
    let id = workload.info.id;

    if workload.info.next_action != NextAction::Pay {
        // waiting on co-signers
        return Ok(HttpResponse::Created().json(json!({ "reservation_id": id })));
    }

    if !app_state
        .planner
        .has_capacity(&workload, MIN_CAPACITY_SECONDS)
        .await?
    {
        debug!("workload {} rejected, pool is almost empty", id);
        if let Err(e) = app_state
            .store_context
            .workload_store
            .set_next_action(id, NextAction::Pay, NextAction::Invalid)
            .await
        {
            error!("failed to mark workload {} invalid: {e}", id);
        }
        return Ok(HttpResponse::PaymentRequired().json(json!({
            "reservation_id": id,
            "error": "pool needs additional capacity to support this workload",
        })));
    }

    handle_public_ip_reservation(&app_state, &workload).await?;

    // immediately deploy the workload
    app_state
        .store_context
        .workload_store
        .set_next_action(id, NextAction::Pay, NextAction::Deploy)
        .await
        .map_err(store_err)?;

    Ok(HttpResponse::Created().json(json!({ "reservation_id": id })))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    size: Option<usize>,
}

#[utoipa::path(
    get,
    path = "/reservations",
    responses((status = 200, description = "One page of reservations")),
    tag = "workloads"
)]
async fn list_reservations(
    query: web::Query<PageQuery>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let size = query.size.unwrap_or(50).clamp(1, MAX_PAGE_SIZE);

    let workloads = app_state
        .store_context
        .workload_store
        .list_page(page, size)
        .await
        .map_err(store_err)?;
    let total = app_state
        .store_context
        .workload_store
        .count()
        .await
        .map_err(store_err)?;
    let pages = total.div_ceil(size).max(1);

    Ok(HttpResponse::Ok()
        .insert_header(("Pages", pages.to_string()))
        .json(workloads))
}

#[utoipa::path(
    get,
    path = "/reservations/{res_id}",
    responses(
        (status = 200, description = "Reservation projection"),
        (status = 404, description = "Unknown reservation id")
    ),
    tag = "workloads"
)]
async fn get_reservation(
    res_id: web::Path<i64>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let workload = load_workload(&app_state, res_id.into_inner()).await?;
    // reservations are a read-only projection over the workload collection
    Ok(HttpResponse::Ok().json(json!({
        "id": workload.info.id,
        "customer_tid": workload.info.customer_tid,
        "next_action": workload.info.next_action,
        "workloads": [workload],
    })))
}

async fn push_signature(
    app_state: &AppState,
    id: i64,
    signature: SigningSignature,
    provision: bool,
) -> Result<Workload> {
    for _ in 0..SIGN_CAS_ATTEMPTS {
        let mut workload = load_workload(app_state, id).await?;
        let expected = workload.info.next_action;

        let (request, signatures) = if provision {
            (
                &workload.info.signing_request_provision,
                &workload.info.signatures_provision,
            )
        } else {
            (
                &workload.info.signing_request_delete,
                &workload.info.signatures_delete,
            )
        };

        if !request.signers.contains(&signature.tid) {
            return Err(ExplorerError::Unauthenticated(format!(
                "signature not required for user '{}'",
                signature.tid
            )));
        }
        if signatures.iter().any(|s| s.tid == signature.tid) {
            return Err(ExplorerError::Validation(format!(
                "user {} has already signed the workload",
                signature.tid
            )));
        }

        if provision && expected != NextAction::Sign {
            return Err(ExplorerError::Unauthenticated(
                "workload not expecting signatures".to_string(),
            ));
        }

        let user = app_state
            .store_context
            .user_store
            .get(signature.tid)
            .await
            .map_err(store_err)?
            .ok_or_else(|| ExplorerError::NotFound("customer id not found".to_string()))?;
        workload.verify_signer(&user.pubkey, &signature).map_err(|e| {
            ExplorerError::Unauthenticated(format!("failed to verify signature: {}", e))
        })?;

        let mut stamped = signature.clone();
        stamped.epoch = Utc::now().timestamp();
        if provision {
            workload.info.signatures_provision.push(stamped);
        } else {
            workload.info.signatures_delete.push(stamped);
        }

        pipeline::progress(&mut workload);

        match app_state
            .store_context
            .workload_store
            .update_cas(&workload, expected)
            .await
            .map_err(store_err)?
        {
            CasOutcome::Written => return Ok(workload),
            CasOutcome::Stale => continue,
            CasOutcome::Missing => {
                return Err(ExplorerError::NotFound(format!(
                    "workload {} not found",
                    id
                )))
            }
        }
    }

    Err(ExplorerError::StoreTransient(
        "signature push kept racing, giving up".to_string(),
    ))
}

#[utoipa::path(
    post,
    path = "/reservations/{res_id}/sign/provision",
    responses(
        (status = 201, description = "Signature recorded"),
        (status = 400, description = "Duplicate or malformed signature"),
        (status = 401, description = "Signer not part of the signing request")
    ),
    tag = "workloads"
)]
async fn sign_provision(
    signer: Signer,
    res_id: web::Path<i64>,
    body: web::Json<SigningSignature>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let signature = body.into_inner();
    signer.require(signature.tid)?;
    let id = res_id.into_inner();

    let workload = push_signature(&app_state, id, signature, true).await?;

    // quorum may have been reached: try to move Pay -> Deploy now
    if workload.info.next_action == NextAction::Pay {
        if app_state
            .planner
            .has_capacity(&workload, MIN_CAPACITY_SECONDS)
            .await?
        {
            if app_state
                .store_context
                .workload_store
                .set_next_action(id, NextAction::Pay, NextAction::Deploy)
                .await
                .map_err(store_err)?
                == CasOutcome::Written
            {
                handle_public_ip_reservation(&app_state, &workload).await?;
                app_state
                    .store_context
                    .queue_store
                    .push(&workload.info.node_id, id)
                    .await
                    .map_err(store_err)?;
            }
        } else {
            debug!("workload {} signed but its pool cannot hold it yet", id);
        }
    }

    Ok(HttpResponse::Created().json(json!({})))
}

#[utoipa::path(
    post,
    path = "/reservations/{res_id}/sign/delete",
    responses(
        (status = 201, description = "Signature recorded"),
        (status = 400, description = "Duplicate or malformed signature"),
        (status = 401, description = "Signer not part of the signing request")
    ),
    tag = "workloads"
)]
async fn sign_delete(
    signer: Signer,
    res_id: web::Path<i64>,
    body: web::Json<SigningSignature>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let signature = body.into_inner();
    signer.require(signature.tid)?;
    let id = res_id.into_inner();

    let workload = push_signature(&app_state, id, signature, false).await?;

    if workload.info.next_action == NextAction::Delete {
        // make the teardown visible to a node that already paged past it
        app_state
            .store_context
            .queue_store
            .push(&workload.info.node_id, id)
            .await
            .map_err(store_err)?;
    }

    Ok(HttpResponse::Created().json(json!({})))
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    #[serde(default)]
    from: i64,
}

#[utoipa::path(
    get,
    path = "/reservations/workloads/{node_id}",
    responses((status = 200, description = "Up to 200 actionable workloads, x-last-id header")),
    tag = "workloads"
)]
async fn poll_workloads(
    node_id: web::Path<String>,
    query: web::Query<PollQuery>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let node_id = node_id.into_inner();
    let from = query.from.max(0);
    let actionable = [NextAction::Deploy, NextAction::Delete];

    let mut workloads = app_state
        .store_context
        .workload_store
        .list_for_node(&node_id, from, &actionable, MAX_PAGE_SIZE)
        .await
        .map_err(store_err)?;
    let mut last_id = workloads.iter().map(|w| w.info.id).max().unwrap_or(from);

    if workloads.is_empty() {
        // only an empty page consults the queue: it holds workloads with
        // ids the poller already advanced past
        let queued = app_state
            .store_context
            .queue_store
            .list(&node_id, MAX_PAGE_SIZE)
            .await
            .map_err(store_err)?;
        for id in queued {
            let Some(workload) = app_state
                .store_context
                .workload_store
                .get(id)
                .await
                .map_err(store_err)?
            else {
                continue;
            };
            if !workload.is_any(&actionable) {
                continue;
            }
            last_id = last_id.max(workload.info.id);
            workloads.push(workload);
        }
    }

    if workloads.is_empty() {
        last_id = app_state
            .store_context
            .workload_store
            .last_id()
            .await
            .map_err(store_err)?;
    }

    Ok(HttpResponse::Ok()
        .insert_header(("x-last-id", last_id.to_string()))
        .json(workloads))
}

#[utoipa::path(
    get,
    path = "/reservations/workloads/{gwid}",
    responses(
        (status = 200, description = "The workload, result embedded"),
        (status = 404, description = "Unknown workload")
    ),
    tag = "workloads"
)]
async fn get_workload(gwid: web::Path<String>, app_state: Data<AppState>) -> Result<HttpResponse> {
    let gwid = gwid.into_inner();
    let id = parse_gwid(&gwid)?;
    let workload = load_workload(&app_state, id).await?;
    if workload.unique_workload_id() != gwid {
        return Err(ExplorerError::NotFound("workload not found".to_string()));
    }
    Ok(HttpResponse::Ok().json(workload))
}

#[utoipa::path(
    put,
    path = "/reservations/workloads/{gwid}/{node_id}",
    responses(
        (status = 201, description = "Result recorded, pool accounting updated"),
        (status = 401, description = "Invalid result signature"),
        (status = 404, description = "Unknown workload")
    ),
    tag = "workloads"
)]
async fn put_workload_result(
    path: web::Path<(String, String)>,
    body: web::Json<WorkloadResult>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let (gwid, node_id) = path.into_inner();
    let id = parse_gwid(&gwid)?;

    let mut result = body.into_inner();
    result.workload_id = gwid.clone();
    result.node_id = node_id.clone();
    result.epoch = Utc::now().timestamp();

    let node = app_state
        .store_context
        .node_store
        .get(&node_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::NotFound(format!("node {} not found", node_id)))?;
    result.verify(&node.public_key_hex).map_err(|e| {
        ExplorerError::Unauthenticated(format!("invalid result signature: {}", e))
    })?;

    let mut workload = load_workload(&app_state, id).await?;
    if workload.unique_workload_id() != gwid || workload.info.node_id != node_id {
        return Err(ExplorerError::NotFound("workload not found".to_string()));
    }

    let expected = workload.info.next_action;
    let state = result.state;
    workload.info.result = Some(result);

    match state {
        ResultState::Ok => {
            app_state
                .store_context
                .workload_store
                .update_cas(&workload, expected)
                .await
                .map_err(store_err)?;
            app_state.planner.add_used_capacity(&workload).await?;
        }
        ResultState::Error => {
            app_state.planner.remove_used_capacity(&workload).await?;
            workload.info.next_action = NextAction::Delete;
            app_state
                .store_context
                .workload_store
                .update_cas(&workload, expected)
                .await
                .map_err(store_err)?;
            release_public_ip(&app_state, &workload).await?;
        }
        ResultState::Deleted => {
            return Err(ExplorerError::Validation(
                "deleted results are reported through DELETE".to_string(),
            ));
        }
    }

    app_state
        .store_context
        .queue_store
        .pop(&node_id, id)
        .await
        .map_err(store_err)?;

    Ok(HttpResponse::Created().json(json!({})))
}

// This endpoint intentionally carries no caller authentication: a teardown
// acknowledgement has no body to sign. The gwid/node binding is validated
// against the stored workload instead.
#[utoipa::path(
    delete,
    path = "/reservations/workloads/{gwid}/{node_id}",
    responses(
        (status = 200, description = "Workload marked deleted, capacity released"),
        (status = 404, description = "Unknown workload")
    ),
    tag = "workloads"
)]
async fn put_workload_deleted(
    path: web::Path<(String, String)>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let (gwid, node_id) = path.into_inner();
    let id = parse_gwid(&gwid)?;

    let mut workload = load_workload(&app_state, id).await?;
    if workload.unique_workload_id() != gwid || workload.info.node_id != node_id {
        return Err(ExplorerError::NotFound("workload not found".to_string()));
    }

    app_state.planner.remove_used_capacity(&workload).await?;

    let expected = workload.info.next_action;
    let mut result = workload.info.result.clone().unwrap_or_default();
    result.workload_id = gwid;
    result.node_id = node_id.clone();
    result.state = ResultState::Deleted;
    result.epoch = Utc::now().timestamp();
    workload.info.result = Some(result);
    workload.info.next_action = NextAction::Deleted;

    app_state
        .store_context
        .workload_store
        .update_cas(&workload, expected)
        .await
        .map_err(store_err)?;

    app_state
        .store_context
        .queue_store
        .pop(&node_id, id)
        .await
        .map_err(store_err)?;

    release_public_ip(&app_state, &workload).await?;

    Ok(HttpResponse::Ok().json(json!({})))
}

pub fn reservations_routes() -> Scope {
    web::scope("/reservations")
        .service(pools_routes())
        .route("", post().to(create_workload))
        .route("", get().to(list_reservations))
        .route(
            "/workloads/{gwid:\\d+-\\d+}/{node_id}",
            put().to(put_workload_result),
        )
        .route(
            "/workloads/{gwid:\\d+-\\d+}/{node_id}",
            delete().to(put_workload_deleted),
        )
        .route("/workloads/{gwid:\\d+-\\d+}", get().to(get_workload))
        .route("/workloads/{node_id}", get().to(poll_workloads))
        .route("/{res_id:\\d+}", get().to(get_reservation))
        .route("/{res_id:\\d+}/sign/provision", post().to(sign_provision))
        .route("/{res_id:\\d+}/sign/delete", post().to(sign_delete))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::helper::create_test_app_state;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use base64::Engine;
    use ed25519_dalek::{Signer as _, SigningKey};
    use rand::rngs::OsRng;
    use shared::models::farm::{Farm, FarmPublicIp};
    use shared::models::node::Node;
    use shared::models::pool::{CapacityReservation, CapacityReservationData};
    use shared::models::user::User;
    use shared::models::workload::{
        PublicIp, ReservationInfo, SigningRequest, Volume, VolumeType, WorkloadType,
    };
    use shared::security::auth_signature_middleware::signing_string;
    use shared::security::keys;
    use std::net::IpAddr;
    use std::str::FromStr;

    async fn register_user(app_state: &AppState, name: &str) -> (i64, SigningKey) {
        let key = SigningKey::generate(&mut OsRng);
        let user = app_state
            .store_context
            .user_store
            .create(User {
                name: name.to_string(),
                pubkey: hex::encode(key.verifying_key().to_bytes()),
                ..Default::default()
            })
            .await
            .unwrap();
        (user.id, key)
    }

    fn auth_header(key: &SigningKey, tid: i64) -> (&'static str, String) {
        let created = Utc::now().timestamp();
        let signature = key.sign(signing_string(created, tid).as_bytes());
        (
            "Authorization",
            format!(
                r#"Signature keyId="{}",algorithm="ed25519",created="{}",signature="{}""#,
                tid,
                created,
                base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
            ),
        )
    }

    /// Farm with two nodes and one public address, owned by `owner`.
    async fn seed_farm(app_state: &AppState, owner: i64, node_key: &SigningKey) -> (i64, Vec<String>) {
        let farm = app_state
            .store_context
            .farm_store
            .create(Farm {
                threebot_id: owner,
                name: "farm-7".to_string(),
                ipaddresses: vec![FarmPublicIp {
                    address: "203.0.113.7/24".to_string(),
                    gateway: "203.0.113.1".to_string(),
                    reservation_id: 0,
                }],
                ..Default::default()
            })
            .await
            .unwrap();

        let mut node_ids = Vec::new();
        for name in ["node-1", "node-2"] {
            let node = app_state
                .store_context
                .node_store
                .upsert(Node {
                    node_id: name.to_string(),
                    farm_id: farm.id,
                    public_key_hex: hex::encode(node_key.verifying_key().to_bytes()),
                    ..Default::default()
                })
                .await
                .unwrap();
            node_ids.push(node.node_id);
        }
        (farm.id, node_ids)
    }

    /// Reserve and (free-escrow) fund a pool for `owner`.
    async fn funded_pool(
        app_state: &AppState,
        owner: i64,
        node_ids: Vec<String>,
        cus: u64,
        sus: u64,
    ) -> i64 {
        let data = CapacityReservationData {
            cus,
            sus,
            nus: 36_000,
            ipv4us: 36_000,
            node_ids,
            currencies: vec!["TFT".to_string()],
            ..Default::default()
        };
        let reservation = CapacityReservation {
            json: serde_json::to_string(&data).unwrap(),
            data_reservation: data,
            customer_tid: owner,
            ..Default::default()
        };
        let (pool_id, _) = app_state
            .planner
            .reserve(reservation, vec!["TFT".to_string()])
            .await
            .unwrap();
        pool_id
    }

    fn signed_volume(pool_id: i64, node_id: &str, tid: i64, key: &SigningKey) -> Workload {
        let mut workload = Workload {
            info: ReservationInfo {
                node_id: node_id.to_string(),
                pool_id,
                customer_tid: tid,
                workload_type: WorkloadType::Volume,
                ..Default::default()
            },
            data: WorkloadData::Volume(Volume {
                size: 1,
                kind: VolumeType::Ssd,
            }),
        };
        workload.info.customer_signature =
            keys::sign_hex(key, workload.signature_challenge().as_bytes());
        workload
    }

    fn signed_public_ip(pool_id: i64, node_id: &str, tid: i64, key: &SigningKey) -> Workload {
        let mut workload = Workload {
            info: ReservationInfo {
                node_id: node_id.to_string(),
                pool_id,
                customer_tid: tid,
                workload_type: WorkloadType::PublicIp,
                ..Default::default()
            },
            data: WorkloadData::PublicIp(PublicIp {
                ipaddress: IpAddr::from_str("203.0.113.7").unwrap(),
            }),
        };
        workload.info.customer_signature =
            keys::sign_hex(key, workload.signature_challenge().as_bytes());
        workload
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .service(reservations_routes()),
            )
            .await
        };
    }

    #[actix_web::test]
    #[ignore = "requires a local redis instance"]
    async fn volume_happy_path_reaches_the_node() {
        let app_state = create_test_app_state().await;
        let (owner, key) = register_user(&app_state, "customer-42").await;
        let node_key = SigningKey::generate(&mut OsRng);
        let (_farm, node_ids) = seed_farm(&app_state, owner, &node_key).await;
        let pool_id = funded_pool(&app_state, owner, node_ids.clone(), 36_000, 36_000).await;

        let pool = app_state.planner.pool_by_id(pool_id).await.unwrap();
        assert_eq!(pool.cus, 36_000.0);

        let app = test_app!(app_state);
        let workload = signed_volume(pool_id, &node_ids[0], owner, &key);
        let req = test::TestRequest::post()
            .uri("/reservations")
            .insert_header(auth_header(&key, owner))
            .set_json(&workload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let id = body["reservation_id"].as_i64().unwrap();

        let stored = app_state
            .store_context
            .workload_store
            .get(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.info.next_action, NextAction::Deploy);

        // the node sees it on its first poll, cursor lands on the new id
        let req = test::TestRequest::get()
            .uri(&format!("/reservations/workloads/{}?from=0", node_ids[0]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let last_id = resp
            .headers()
            .get("x-last-id")
            .unwrap()
            .to_str()
            .unwrap()
            .parse::<i64>()
            .unwrap();
        assert_eq!(last_id, id);
        let page: Vec<Workload> = test::read_body_json(resp).await;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].info.id, id);
    }

    #[actix_web::test]
    #[ignore = "requires a local redis instance"]
    async fn starved_pool_rejects_with_402_and_invalid() {
        let app_state = create_test_app_state().await;
        let (owner, key) = register_user(&app_state, "customer-42").await;
        let node_key = SigningKey::generate(&mut OsRng);
        let (_farm, node_ids) = seed_farm(&app_state, owner, &node_key).await;
        // 1 GiB SSD drains 0.005 su/s: 0.1 su-seconds lasts well under 2 min
        let pool_id = funded_pool(&app_state, owner, node_ids.clone(), 36_000, 0).await;

        let before = app_state.planner.pool_by_id(pool_id).await.unwrap();

        let app = test_app!(app_state);
        let workload = signed_volume(pool_id, &node_ids[0], owner, &key);
        let req = test::TestRequest::post()
            .uri("/reservations")
            .insert_header(auth_header(&key, owner))
            .set_json(&workload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let id = body["reservation_id"].as_i64().unwrap();

        let stored = app_state
            .store_context
            .workload_store
            .get(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.info.next_action, NextAction::Invalid);

        // no capacity was charged
        let after = app_state.planner.pool_by_id(pool_id).await.unwrap();
        assert_eq!(after.active_su, before.active_su);
        assert_eq!(after.active_cu, before.active_cu);
    }

    #[actix_web::test]
    #[ignore = "requires a local redis instance"]
    async fn error_result_releases_capacity_and_schedules_teardown() {
        let app_state = create_test_app_state().await;
        let (owner, key) = register_user(&app_state, "customer-42").await;
        let node_key = SigningKey::generate(&mut OsRng);
        let (_farm, node_ids) = seed_farm(&app_state, owner, &node_key).await;
        let pool_id = funded_pool(&app_state, owner, node_ids.clone(), 36_000, 36_000).await;

        let app = test_app!(app_state);
        let workload = signed_volume(pool_id, &node_ids[0], owner, &key);
        let req = test::TestRequest::post()
            .uri("/reservations")
            .insert_header(auth_header(&key, owner))
            .set_json(&workload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let id = body["reservation_id"].as_i64().unwrap();

        // node reports a deploy failure
        let mut result = WorkloadResult {
            workload_id: format!("{}-1", id),
            node_id: node_ids[0].clone(),
            state: ResultState::Error,
            message: "disk on fire".to_string(),
            ..Default::default()
        };
        result.signature = keys::sign_hex(&node_key, result.signature_challenge().as_bytes());

        let req = test::TestRequest::put()
            .uri(&format!("/reservations/workloads/{}-1/{}", id, node_ids[0]))
            .set_json(&result)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let stored = app_state
            .store_context
            .workload_store
            .get(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.info.next_action, NextAction::Delete);
        let pool = app_state.planner.pool_by_id(pool_id).await.unwrap();
        assert_eq!(pool.active_su, 0.0);

        // the teardown shows up on the next poll, then the ack finishes it
        let req = test::TestRequest::get()
            .uri(&format!("/reservations/workloads/{}?from=0", node_ids[0]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let page: Vec<Workload> = test::read_body_json(resp).await;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].info.next_action, NextAction::Delete);

        let req = test::TestRequest::delete()
            .uri(&format!("/reservations/workloads/{}-1/{}", id, node_ids[0]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let stored = app_state
            .store_context
            .workload_store
            .get(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.info.next_action, NextAction::Deleted);
    }

    #[actix_web::test]
    #[ignore = "requires a local redis instance"]
    async fn provision_quorum_gates_deployment() {
        let app_state = create_test_app_state().await;
        let (owner, key) = register_user(&app_state, "customer-42").await;
        let (signer_a, key_a) = register_user(&app_state, "signer-a").await;
        let (signer_b, key_b) = register_user(&app_state, "signer-b").await;
        let node_key = SigningKey::generate(&mut OsRng);
        let (_farm, node_ids) = seed_farm(&app_state, owner, &node_key).await;
        let pool_id = funded_pool(&app_state, owner, node_ids.clone(), 36_000, 36_000).await;

        let mut workload = signed_volume(pool_id, &node_ids[0], owner, &key);
        workload.info.signing_request_provision = SigningRequest {
            signers: vec![signer_a, signer_b],
            quorum_min: 2,
        };
        workload.info.customer_signature =
            keys::sign_hex(&key, workload.signature_challenge().as_bytes());

        let app = test_app!(app_state);
        let req = test::TestRequest::post()
            .uri("/reservations")
            .insert_header(auth_header(&key, owner))
            .set_json(&workload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let id = body["reservation_id"].as_i64().unwrap();

        let stored = app_state
            .store_context
            .workload_store
            .get(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.info.next_action, NextAction::Sign);
        let challenge = stored.signature_challenge();

        // first signer alone does not reach the quorum
        let signature = SigningSignature {
            tid: signer_a,
            signature: keys::sign_hex(&key_a, challenge.as_bytes()),
            epoch: 0,
        };
        let req = test::TestRequest::post()
            .uri(&format!("/reservations/{}/sign/provision", id))
            .insert_header(auth_header(&key_a, signer_a))
            .set_json(&signature)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let stored = app_state
            .store_context
            .workload_store
            .get(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.info.next_action, NextAction::Sign);

        // the second signature completes the quorum
        let signature = SigningSignature {
            tid: signer_b,
            signature: keys::sign_hex(&key_b, challenge.as_bytes()),
            epoch: 0,
        };
        let req = test::TestRequest::post()
            .uri(&format!("/reservations/{}/sign/provision", id))
            .insert_header(auth_header(&key_b, signer_b))
            .set_json(&signature)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let stored = app_state
            .store_context
            .workload_store
            .get(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.info.next_action, NextAction::Deploy);

        // a repeat signature by the first signer is refused
        let signature = SigningSignature {
            tid: signer_a,
            signature: keys::sign_hex(&key_a, challenge.as_bytes()),
            epoch: 0,
        };
        let req = test::TestRequest::post()
            .uri(&format!("/reservations/{}/sign/provision", id))
            .insert_header(auth_header(&key_a, signer_a))
            .set_json(&signature)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    #[ignore = "requires a local redis instance"]
    async fn public_ip_swap_moves_the_binding_atomically() {
        let app_state = create_test_app_state().await;
        let (owner, key) = register_user(&app_state, "customer-42").await;
        let node_key = SigningKey::generate(&mut OsRng);
        let (farm_id, node_ids) = seed_farm(&app_state, owner, &node_key).await;
        let pool_id = funded_pool(&app_state, owner, node_ids.clone(), 36_000, 0).await;

        let app = test_app!(app_state);

        let first = signed_public_ip(pool_id, &node_ids[0], owner, &key);
        let req = test::TestRequest::post()
            .uri("/reservations")
            .insert_header(auth_header(&key, owner))
            .set_json(&first)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let first_id = body["reservation_id"].as_i64().unwrap();

        let farm = app_state
            .store_context
            .farm_store
            .get(farm_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(farm.ipaddresses[0].reservation_id, first_id);

        // same customer claims the same address again: the binding swaps
        // and the old holder heads for teardown
        let second = signed_public_ip(pool_id, &node_ids[1], owner, &key);
        let req = test::TestRequest::post()
            .uri("/reservations")
            .insert_header(auth_header(&key, owner))
            .set_json(&second)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let second_id = body["reservation_id"].as_i64().unwrap();

        let farm = app_state
            .store_context
            .farm_store
            .get(farm_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(farm.ipaddresses[0].reservation_id, second_id);

        let old = app_state
            .store_context
            .workload_store
            .get(first_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old.info.next_action, NextAction::Delete);
    }
}

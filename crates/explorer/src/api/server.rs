use std::sync::Arc;

use actix_web::middleware::{Compress, NormalizePath, TrailingSlash};
use actix_web::{middleware, web, web::Data, App, HttpResponse, HttpServer, Scope};
use anyhow::Error;
use futures_util::FutureExt;
use log::info;
use serde_json::json;
use shared::gridnetwork::GridPolicy;
use shared::security::auth_signature_middleware::{ValidateSignature, ValidatorState};

use crate::api::routes::farms::{farm_ips_routes, farms_routes};
use crate::api::routes::nodes::nodes_routes;
use crate::api::routes::users::users_routes;
use crate::api::routes::workloads::reservations_routes;
use crate::capacity::CapacityPlanner;
use crate::escrow::Escrow;
use crate::store::core::StoreContext;

pub struct AppState {
    pub store_context: Arc<StoreContext>,
    pub planner: Arc<CapacityPlanner>,
    pub escrow: Arc<dyn Escrow>,
    pub policy: GridPolicy,
}

/// The same API is served under `/api/v1` and the legacy `/explorer`
/// prefix; both accept the same bodies.
fn api_scope(prefix: &str, validator_state: Arc<ValidatorState>) -> Scope {
    web::scope(prefix)
        // the ip management scope is fully write, it sits behind the
        // signature middleware; everything else authenticates per handler
        .service(farm_ips_routes().wrap(ValidateSignature::new(validator_state)))
        .service(reservations_routes())
        .service(users_routes())
        .service(farms_routes())
        .service(nodes_routes())
}

pub async fn start_server(
    host: &str,
    port: u16,
    store_context: Arc<StoreContext>,
    planner: Arc<CapacityPlanner>,
    escrow: Arc<dyn Escrow>,
    policy: GridPolicy,
) -> Result<(), Error> {
    info!("Starting server at http://{}:{}", host, port);
    let app_state = Data::new(AppState {
        store_context: store_context.clone(),
        planner,
        escrow,
        policy,
    });

    let user_store = store_context.user_store.clone();
    let validator_state = Arc::new(ValidatorState::new(move |user_id| {
        let user_store = user_store.clone();
        async move { user_store.pubkey_of(user_id).await.ok().flatten() }.boxed_local()
    }));

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .wrap(Compress::default())
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .app_data(web::PayloadConfig::default().limit(2_097_152))
            .service(web::resource("/health").route(web::get().to(|| async {
                HttpResponse::Ok().json(json!({"status": "up"}))
            })))
            .service(api_scope("/api/v1", validator_state.clone()))
            .service(api_scope("/explorer", validator_state.clone()))
            .default_service(web::route().to(|| async {
                HttpResponse::NotFound().json(json!({"error": "resource not found"}))
            }))
    })
    .bind((host, port))?
    .run()
    .await?;
    Ok(())
}

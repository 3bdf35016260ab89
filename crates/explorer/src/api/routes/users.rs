use actix_web::web::{self, get, post, Data};
use actix_web::{HttpResponse, Scope};
use serde_json::json;
use shared::models::user::{User, UserRequest};

use crate::api::routes::store_err;
use crate::api::server::AppState;
use crate::error::ExplorerError;

type Result<T> = std::result::Result<T, ExplorerError>;

#[utoipa::path(
    post,
    path = "/users",
    responses(
        (status = 201, description = "User registered"),
        (status = 400, description = "Invalid name or pubkey"),
        (status = 409, description = "Name already taken")
    ),
    tag = "phonebook"
)]
async fn create_user(
    body: web::Json<UserRequest>,
    app_state: Data<AppState>,
) -> Result<HttpResponse> {
    let user: User = body.into_inner().into();
    user.validate()
        .map_err(|e| ExplorerError::Validation(e.to_string()))?;

    let user = app_state
        .store_context
        .user_store
        .create(user)
        .await
        .map_err(|e| ExplorerError::Conflict(e.to_string()))?;

    Ok(HttpResponse::Created().json(json!({ "id": user.id })))
}

#[utoipa::path(
    get,
    path = "/users",
    responses((status = 200, description = "All registered users")),
    tag = "phonebook"
)]
async fn list_users(app_state: Data<AppState>) -> Result<HttpResponse> {
    let users = app_state
        .store_context
        .user_store
        .list()
        .await
        .map_err(store_err)?;
    Ok(HttpResponse::Ok().json(users))
}

#[utoipa::path(
    get,
    path = "/users/{user_id}",
    responses(
        (status = 200, description = "The user"),
        (status = 404, description = "Unknown user id")
    ),
    tag = "phonebook"
)]
async fn get_user(user_id: web::Path<i64>, app_state: Data<AppState>) -> Result<HttpResponse> {
    let id = user_id.into_inner();
    let user = app_state
        .store_context
        .user_store
        .get(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| ExplorerError::NotFound(format!("user {} not found", id)))?;
    Ok(HttpResponse::Ok().json(user))
}

pub fn users_routes() -> Scope {
    web::scope("/users")
        .route("", post().to(create_user))
        .route("", get().to(list_users))
        .route("/{user_id:\\d+}", get().to(get_user))
}

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::services::{CredentialService, ProfileUpdate, Registration},
    error::{ApiError, ServiceError},
    state::AppState,
    users::dto::{
        CreateUserRequest, LoginRequest, MessageResponse, PublicUser, TokenResponse,
        UpdateUserRequest,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        // other methods on these names would otherwise fall through to `/:id` as a bad id
        .route("/register", post(register).fallback(user_not_found))
        .route("/login", post(login).fallback(user_not_found))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
}

const BAD_REQUEST: StatusCode = StatusCode::BAD_REQUEST;
const INTERNAL: StatusCode = StatusCode::INTERNAL_SERVER_ERROR;

/// Malformed JSON, wrong field types and a missing content type are
/// validation errors like any other.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        ServiceError::Validation(rejection.body_text()).into_api(BAD_REQUEST)
    })
}

/// An id that is not an integer cannot name a user.
fn user_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|_| ServiceError::NotFound.into_api(INTERNAL))
}

async fn user_not_found() -> ApiError {
    ServiceError::NotFound.into_api(INTERNAL)
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<PublicUser>>, ApiError> {
    let users = state
        .users
        .find_all()
        .await
        .map_err(|e| ServiceError::from(e).into_api(INTERNAL))?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<PublicUser>, ApiError> {
    let id = user_id(id)?;
    let user = state
        .users
        .find_by_id(id)
        .await
        .map_err(|e| ServiceError::from(e).into_api(INTERNAL))?
        .ok_or_else(|| ServiceError::NotFound.into_api(INTERNAL))?;
    Ok(Json(user.into()))
}

#[instrument(skip(svc, payload))]
pub async fn create_user(
    State(svc): State<CredentialService>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PublicUser>), ApiError> {
    let payload = json_body(payload)?;
    let input = Registration::parse(payload.username, payload.email, payload.password)
        .map_err(|e| e.into_api(BAD_REQUEST))?;
    let user = svc
        .register_user(input)
        .await
        .map_err(|e| e.into_api(BAD_REQUEST))?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(svc, payload))]
pub async fn update_user(
    State(svc): State<CredentialService>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<PublicUser>, ApiError> {
    let id = user_id(id)?;
    let payload = json_body(payload)?;
    let update = ProfileUpdate::parse(payload.username, payload.email, payload.password)
        .map_err(|e| e.into_api(BAD_REQUEST))?;
    let user = svc
        .update_user(id, update)
        .await
        .map_err(|e| e.into_api(BAD_REQUEST))?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = user_id(id)?;
    let deleted = state
        .users
        .delete(id)
        .await
        .map_err(|e| ServiceError::from(e).into_api(INTERNAL))?;
    if !deleted {
        return Err(ServiceError::NotFound.into_api(INTERNAL));
    }
    info!(user_id = id, "user deleted");
    Ok(Json(MessageResponse::new("User deleted successfully")))
}

#[instrument(skip(svc, payload))]
pub async fn register(
    State(svc): State<CredentialService>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let payload = json_body(payload)?;
    let input = Registration::parse(payload.username, payload.email, payload.password)
        .map_err(|e| e.into_api(BAD_REQUEST))?;
    svc.register_user(input)
        .await
        .map_err(|e| e.into_api(BAD_REQUEST))?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("User registered successfully")),
    ))
}

#[instrument(skip(svc, payload))]
pub async fn login(
    State(svc): State<CredentialService>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let payload = json_body(payload)?;
    let token = svc
        .login(payload.username, payload.password)
        .await
        .map_err(|e| e.into_api(BAD_REQUEST))?;
    Ok(Json(TokenResponse { token }))
}

//! Account administration. Every route requires an authenticated admin; the
//! level check itself lives in the account service.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{
    error::{ApiError, ErrorBody},
    principal::require_auth,
    types::{AttemptsQuery, AttemptsResponse, DeactivateResponse, SetRoleRequest},
    AppState,
};

pub const DEFAULT_ATTEMPTS_LIMIT: u32 = 20;

async fn actor(headers: &HeaderMap, state: &AppState) -> Result<Uuid, ApiError> {
    Ok(require_auth(headers, state).await?.identity.account_id)
}

#[utoipa::path(
    put,
    path = "/v1/admin/accounts/{id}/role",
    params(("id" = Uuid, Path, description = "Account id")),
    request_body = SetRoleRequest,
    responses(
        (status = 204, description = "Role changed"),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Caller is not an admin", body = ErrorBody),
        (status = 404, description = "Account not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn set_role(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetRoleRequest>,
) -> Result<StatusCode, ApiError> {
    let actor = actor(&headers, &state).await?;
    state.accounts.set_role(actor, id, request.role).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/admin/accounts/{id}/deactivate",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account deactivated", body = DeactivateResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorBody),
        (status = 404, description = "Account not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn deactivate(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeactivateResponse>, ApiError> {
    let actor = actor(&headers, &state).await?;
    let revoked_sessions = state.accounts.deactivate(actor, id).await?;
    Ok(Json(DeactivateResponse { revoked_sessions }))
}

#[utoipa::path(
    post,
    path = "/v1/admin/accounts/{id}/reactivate",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 204, description = "Account reactivated"),
        (status = 403, description = "Caller is not an admin", body = ErrorBody),
        (status = 404, description = "Account not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn reactivate(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let actor = actor(&headers, &state).await?;
    state.accounts.reactivate(actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/admin/accounts/{id}/unlock",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 204, description = "Failed attempts and lockout cleared"),
        (status = 403, description = "Caller is not an admin", body = ErrorBody),
        (status = 404, description = "Account not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn unlock(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let actor = actor(&headers, &state).await?;
    state.accounts.unlock(actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/admin/accounts/{id}/attempts",
    params(("id" = Uuid, Path, description = "Account id"), AttemptsQuery),
    responses(
        (status = 200, description = "Most recent login attempts, newest first", body = AttemptsResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn attempts(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AttemptsQuery>,
) -> Result<Json<AttemptsResponse>, ApiError> {
    let actor = actor(&headers, &state).await?;
    let attempts = state
        .accounts
        .recent_attempts(actor, id, query.limit.unwrap_or(DEFAULT_ATTEMPTS_LIMIT))
        .await?;
    Ok(Json(AttemptsResponse { attempts }))
}

//! Login, logout, refresh and session endpoints.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::error;

use crate::{
    api::{
        error::{ApiError, ErrorBody},
        principal::{
            clear_session_cookie, client_info, extract_session_token, require_auth, session_cookie,
        },
        types::{
            ChangePasswordRequest, LoginRequest, MessageResponse, RefreshRequest,
            SessionsResponse, TokenResponse,
        },
        AppState,
    },
    auth::SessionGrant,
    model::{Identity, TokenKind},
};

fn grant_response(state: &AppState, grant: SessionGrant) -> Response {
    let mut headers = HeaderMap::new();
    let max_age = state.auth.config().session_ttl().num_seconds();
    match session_cookie(&grant.tokens.session_token, max_age, state.secure_cookies) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
    (StatusCode::OK, headers, Json(TokenResponse::from(grant))).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session created", body = TokenResponse),
        (status = 401, description = "Authentication failed", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let client = client_info(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_proxy_headers,
    );
    let grant = state
        .auth
        .login(&request.identifier, &request.password, &client)
        .await?;
    Ok(grant_response(&state, grant))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        if let Err(err) = state.auth.logout(&token).await {
            error!("Failed to revoke session: {err}");
        }
    }

    // Always clear the cookie, even if the session was already gone.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(state.secure_cookies) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers)
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session rotated", body = TokenResponse),
        (status = 401, description = "Refresh token unknown, expired or already used", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Response, ApiError> {
    let client = client_info(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_proxy_headers,
    );
    let grant = state.auth.refresh(&request.refresh_token, &client).await?;
    Ok(grant_response(&state, grant))
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = Identity),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Result<Response, ApiError> {
    // Missing tokens are "no session", not an error.
    let Some(token) = extract_session_token(&headers) else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    Ok(match state.auth.resolve(&token).await? {
        Some(identity) => (StatusCode::OK, Json(identity)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions of the caller, newest first", body = SessionsResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn sessions(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let caller = require_auth(&headers, &state).await?;
    let sessions = state
        .auth
        .list_sessions(caller.identity.account_id)
        .await?;
    Ok(Json(SessionsResponse { sessions }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/change",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; all sessions revoked", body = MessageResponse),
        (status = 400, description = "New password too short", body = ErrorBody),
        (status = 401, description = "Not authenticated or wrong current password", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let caller = require_auth(&headers, &state).await?;
    state
        .accounts
        .change_password(
            caller.identity.account_id,
            &request.current_password,
            &request.new_password,
        )
        .await?;
    Ok(Json(MessageResponse::new("password changed")))
}

#[utoipa::path(
    post,
    path = "/v1/auth/email/resend",
    responses(
        (status = 202, description = "Verification message queued", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let caller = require_auth(&headers, &state).await?;
    let issued = state
        .recovery
        .issue_email_verification(caller.identity.account_id)
        .await?;
    if let Err(err) = state.sender.send(TokenKind::EmailVerification, &issued) {
        error!("Failed to send verification email: {err:#}");
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("verification email queued")),
    )
        .into_response())
}

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::error;

use crate::{
    api::{
        error::{ApiError, ErrorBody},
        types::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest, VerifyEmailRequest},
        AppState,
    },
    model::TokenKind,
};

const FORGOT_MESSAGE: &str = "if the address belongs to an active account, a reset link is on its way";

#[utoipa::path(
    post,
    path = "/v1/auth/password/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 202, description = "Accepted; the answer does not reveal whether the account exists", body = MessageResponse)
    ),
    tag = "recovery"
)]
pub async fn forgot(
    state: Extension<Arc<AppState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> impl IntoResponse {
    // Same status and body whatever happens below.
    match state.recovery.request_password_reset(&request.email).await {
        Ok(Some(issued)) => {
            if let Err(err) = state.sender.send(TokenKind::PasswordReset, &issued) {
                error!("Failed to send password reset email: {err:#}");
            }
        }
        Ok(None) => {}
        Err(err) => error!("Failed to issue password reset token: {err}"),
    }
    (StatusCode::ACCEPTED, Json(MessageResponse::new(FORGOT_MESSAGE)))
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced; all sessions revoked", body = MessageResponse),
        (status = 400, description = "New password too short", body = ErrorBody),
        (status = 401, description = "Token unknown, used or expired", body = ErrorBody)
    ),
    tag = "recovery"
)]
pub async fn reset(
    state: Extension<Arc<AppState>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .recovery
        .reset_password(&request.token, &request.new_password)
        .await?;
    Ok(Json(MessageResponse::new("password reset")))
}

#[utoipa::path(
    post,
    path = "/v1/auth/email/verify",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 401, description = "Token unknown, used or expired", body = ErrorBody)
    ),
    tag = "recovery"
)]
pub async fn verify_email(
    state: Extension<Arc<AppState>>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.recovery.verify_email(&request.token).await?;
    Ok(Json(MessageResponse::new("email verified")))
}

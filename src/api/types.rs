//! Request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::SessionGrant,
    model::{Identity, LoginAttempt, Role, Session},
};

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    pub identifier: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identifier", &self.identifier)
            .field("password", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub identity: Identity,
    pub session_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<SessionGrant> for TokenResponse {
    fn from(grant: SessionGrant) -> Self {
        Self {
            identity: grant.identity,
            session_token: grant.tokens.session_token,
            refresh_token: grant.tokens.refresh_token,
            expires_at: grant.session.expires_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

impl std::fmt::Debug for ResetPasswordRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetPasswordRequest").finish_non_exhaustive()
    }
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl std::fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePasswordRequest").finish_non_exhaustive()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SetRoleRequest {
    pub role: Role,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeactivateResponse {
    pub revoked_sessions: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AttemptsResponse {
    pub attempts: Vec<LoginAttempt>,
}

#[derive(Deserialize, Debug, utoipa::IntoParams)]
pub struct AttemptsQuery {
    /// Page size, 1 to 100.
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn login_request_debug_hides_password() {
        let request = LoginRequest {
            identifier: "ana".to_string(),
            password: "hunter2-hunter2".to_string(),
        };
        assert!(!format!("{request:?}").contains("hunter2"));
    }

    #[test]
    fn set_role_request_uses_lowercase_tags() -> Result<()> {
        let request: SetRoleRequest = serde_json::from_str(r#"{"role":"analyst"}"#)?;
        assert_eq!(request.role, Role::Analyst);
        let value = serde_json::to_value(&request)?;
        let role = value
            .get("role")
            .and_then(serde_json::Value::as_str)
            .context("missing role")?;
        assert_eq!(role, "analyst");
        Ok(())
    }
}

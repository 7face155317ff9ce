//! Password reset and email verification tokens.
//!
//! This module issues and redeems tokens. Getting the raw token to the user
//! goes through a [`TokenSender`]; the bundled [`LogTokenSender`] only logs
//! that a message would have gone out.

use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    accounts::AccountService,
    auth::{config::AuthConfig, generate_token, hash_token},
    clock::Clock,
    error::{Error, Result},
    model::{DenialReason, NewRecoveryToken, TokenKind},
    store::{with_timeout, AccountStore, RecoveryTokenStore, SessionStore},
    validators::{normalize_email, valid_password, ValidationError},
};

/// A freshly issued token, returned once for delivery.
#[derive(Clone)]
pub struct IssuedToken {
    pub account_id: Uuid,
    pub email: String,
    pub token: String,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("account_id", &self.account_id)
            .field("token", &"***")
            .finish_non_exhaustive()
    }
}

/// Outbound delivery of recovery tokens (email, queue, ...).
pub trait TokenSender: Send + Sync {
    /// # Errors
    /// Delivery failures; the token stays valid until it expires.
    fn send(&self, kind: TokenKind, issued: &IssuedToken) -> anyhow::Result<()>;
}

/// Development sender: logs the recipient, never the token.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTokenSender;

impl TokenSender for LogTokenSender {
    fn send(&self, kind: TokenKind, issued: &IssuedToken) -> anyhow::Result<()> {
        info!(
            to_email = %issued.email,
            kind = kind.as_str(),
            "recovery token send stub"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct RecoveryService {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<dyn RecoveryTokenStore>,
    account_service: AccountService,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl std::fmt::Debug for RecoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryService").finish_non_exhaustive()
    }
}

impl RecoveryService {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<dyn RecoveryTokenStore>,
        account_service: AccountService,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            accounts,
            sessions,
            tokens,
            account_service,
            clock,
            config,
        }
    }

    fn timeout(&self) -> Duration {
        self.config.storage_timeout()
    }

    /// Issue a reset token for the active account owning `email`.
    ///
    /// Unknown and inactive accounts yield `None`; callers should answer the
    /// same way in both cases.
    ///
    /// # Errors
    /// Storage failures.
    #[instrument(skip_all)]
    pub async fn request_password_reset(&self, email: &str) -> Result<Option<IssuedToken>> {
        let email = normalize_email(email);
        let account = with_timeout(self.timeout(), self.accounts.fetch_by_identifier(&email)).await?;
        let Some(account) = account.filter(|account| account.active && account.email == email)
        else {
            debug!("Password reset requested for unknown or inactive account");
            return Ok(None);
        };
        let token = self
            .issue(account.id, TokenKind::PasswordReset, self.config.password_reset_ttl())
            .await?;
        info!(account_id = %account.id, "Password reset token issued");
        Ok(Some(IssuedToken {
            account_id: account.id,
            email: account.email,
            token,
        }))
    }

    /// Redeem a reset token: store the new password, clear the lockout and end
    /// every session of the account.
    ///
    /// # Errors
    /// `AuthenticationDenied(InvalidToken)` for unknown, used or expired tokens.
    #[instrument(skip_all)]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<Uuid> {
        if !valid_password(new_password) {
            return Err(ValidationError::Password.into());
        }
        let account_id = self.consume(token, TokenKind::PasswordReset).await?;
        self.account_service
            .store_password(account_id, new_password)
            .await?;
        with_timeout(self.timeout(), self.accounts.reset_failed_attempts(account_id)).await?;
        let revoked = with_timeout(
            self.timeout(),
            self.sessions.revoke_all_for_account(account_id),
        )
        .await?;
        info!(%account_id, revoked, "Password reset");
        Ok(account_id)
    }

    /// # Errors
    /// `NotFound` for unknown accounts, storage failures.
    #[instrument(skip(self))]
    pub async fn issue_email_verification(&self, account_id: Uuid) -> Result<IssuedToken> {
        let account = with_timeout(self.timeout(), self.accounts.fetch_by_id(account_id))
            .await?
            .ok_or(Error::NotFound("account"))?;
        let token = self
            .issue(
                account.id,
                TokenKind::EmailVerification,
                self.config.email_verification_ttl(),
            )
            .await?;
        Ok(IssuedToken {
            account_id: account.id,
            email: account.email,
            token,
        })
    }

    /// # Errors
    /// `AuthenticationDenied(InvalidToken)` for unknown, used or expired tokens.
    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> Result<Uuid> {
        let account_id = self.consume(token, TokenKind::EmailVerification).await?;
        with_timeout(self.timeout(), self.accounts.mark_email_verified(account_id)).await?;
        info!(%account_id, "Email verified");
        Ok(account_id)
    }

    async fn issue(
        &self,
        account_id: Uuid,
        kind: TokenKind,
        ttl: chrono::Duration,
    ) -> Result<String> {
        let token = generate_token()?;
        with_timeout(
            self.timeout(),
            self.tokens.issue(NewRecoveryToken {
                account_id,
                kind,
                token_hash: hash_token(&token),
                expires_at: self.clock.now() + ttl,
            }),
        )
        .await?;
        Ok(token)
    }

    async fn consume(&self, token: &str, kind: TokenKind) -> Result<Uuid> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::AuthenticationDenied(DenialReason::InvalidToken));
        }
        with_timeout(self.timeout(), self.tokens.consume(&hash_token(token), kind))
            .await?
            .ok_or(Error::AuthenticationDenied(DenialReason::InvalidToken))
    }
}

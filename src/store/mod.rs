//! Persistence contracts and their implementations.
//!
//! Services only talk to storage through these traits. Each lookup returns a
//! tagged result: `Ok(Some(_))` found, `Ok(None)` not found, `Err(_)` system
//! failure. Writes that must not race (failed-attempt increments, session
//! rotation, token consumption) are single atomic operations in every backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{future::Future, time::Duration};
use uuid::Uuid;

use crate::model::{
    Account, LoginAttempt, NewAccount, NewRecoveryToken, NewSession, Role, SensitiveAccess,
    Session, TokenKind,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage call timed out")]
    Timeout,
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Bound a storage call by `limit`; elapsed calls become `StoreError::Timeout`.
///
/// # Errors
/// Whatever the call returns, or `Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

/// Liveness probe for the backing store.
#[async_trait]
pub trait Ping: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Case-insensitive match on username or email.
    async fn fetch_by_identifier(&self, identifier: &str) -> Result<Option<Account>, StoreError>;

    async fn fetch_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// # Errors
    /// `StoreError::Conflict` when the username or email is taken.
    async fn create(&self, account: NewAccount) -> Result<Account, StoreError>;

    /// Atomically increment the counter and return the new value.
    async fn record_failed_attempt(&self, account_id: Uuid) -> Result<i32, StoreError>;

    /// Zero the counter and clear any lockout.
    async fn reset_failed_attempts(&self, account_id: Uuid) -> Result<(), StoreError>;

    async fn record_successful_login(
        &self,
        account_id: Uuid,
        ip: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn lock_until(&self, account_id: Uuid, until: DateTime<Utc>) -> Result<(), StoreError>;

    async fn is_locked(&self, account_id: Uuid) -> Result<bool, StoreError>;

    /// Replace the password hash and drop any legacy salt.
    async fn update_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError>;

    /// Returns `false` when the account does not exist.
    async fn set_role(&self, account_id: Uuid, role: Role) -> Result<bool, StoreError>;

    /// Returns `false` when the account does not exist.
    async fn set_active(&self, account_id: Uuid, active: bool) -> Result<bool, StoreError>;

    async fn mark_email_verified(&self, account_id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: NewSession) -> Result<Session, StoreError>;

    async fn fetch_active_by_token(&self, token_hash: &[u8])
        -> Result<Option<Session>, StoreError>;

    async fn fetch_active_by_refresh(
        &self,
        refresh_hash: &[u8],
    ) -> Result<Option<Session>, StoreError>;

    /// Returns `true` only if this call flipped the session to revoked.
    async fn revoke(&self, session_id: Uuid) -> Result<bool, StoreError>;

    /// Revoke `old_session_id` and insert `replacement` in one step.
    /// `Ok(None)` means the old session was no longer active and nothing was created.
    async fn rotate(
        &self,
        old_session_id: Uuid,
        replacement: NewSession,
    ) -> Result<Option<Session>, StoreError>;

    async fn revoke_all_for_account(&self, account_id: Uuid) -> Result<u64, StoreError>;

    async fn list_active_for_account(&self, account_id: Uuid) -> Result<Vec<Session>, StoreError>;

    /// Revoke expired rows that are still flagged active; returns how many.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

/// Append-only audit target.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError>;

    async fn append_access(&self, access: &SensitiveAccess) -> Result<(), StoreError>;

    /// Newest first.
    async fn recent_attempts(
        &self,
        account_id: Uuid,
        limit: u32,
    ) -> Result<Vec<LoginAttempt>, StoreError>;
}

#[async_trait]
pub trait RecoveryTokenStore: Send + Sync {
    /// Store a token and invalidate earlier unused tokens of the same kind for the account.
    async fn issue(&self, token: NewRecoveryToken) -> Result<(), StoreError>;

    /// Mark a matching unused, unexpired token as used and return its account.
    async fn consume(&self, token_hash: &[u8], kind: TokenKind)
        -> Result<Option<Uuid>, StoreError>;

    /// Delete expired or used tokens; returns how many.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

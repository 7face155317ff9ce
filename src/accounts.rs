//! Account administration: registration, role changes, soft deletion,
//! unlocking and password changes.

use std::{sync::Arc, time::Duration};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{record_failure, AuthConfig},
    clock::Clock,
    crypto::CredentialHasher,
    error::{Error, Result},
    guard::PermissionGuard,
    model::{AccessLevel, Account, DenialReason, Identity, LoginAttempt, NewAccount, Role},
    store::{with_timeout, AccountStore, AuditSink, SessionStore, StoreError},
    validators::{normalize_email, valid_email, valid_password, valid_username, ValidationError},
};

pub const MAX_ATTEMPTS_PAGE: u32 = 100;

/// Input for [`AccountService::register`].
#[derive(Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub role: Option<Role>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"***")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    guard: PermissionGuard,
    hasher: CredentialHasher,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    timeout: Duration,
}

impl std::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountService").finish_non_exhaustive()
    }
}

impl AccountService {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        guard: PermissionGuard,
        hasher: CredentialHasher,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            accounts,
            sessions,
            audit,
            guard,
            hasher,
            clock,
            timeout: config.storage_timeout(),
            config,
        }
    }

    /// Create an account. The role defaults to `viewer`.
    ///
    /// # Errors
    /// `Validation` for malformed input, `Conflict` when the username or email is taken.
    #[instrument(skip(self, registration), fields(username = %registration.username))]
    pub async fn register(&self, registration: Registration) -> Result<Identity> {
        let username = registration.username.trim().to_lowercase();
        if !valid_username(&username) {
            return Err(ValidationError::Username.into());
        }
        let email = normalize_email(&registration.email);
        if !valid_email(&email) {
            return Err(ValidationError::Email.into());
        }
        if !valid_password(&registration.password) {
            return Err(ValidationError::Password.into());
        }

        let record = self.hasher.hash_blocking(&registration.password).await?;
        let password_hash = record
            .encoded()
            .ok_or_else(|| anyhow::anyhow!("hasher produced a non-current record"))?
            .to_string();
        let display_name = registration
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let account = with_timeout(
            self.timeout,
            self.accounts.create(NewAccount {
                username,
                email,
                display_name,
                password_hash,
                role: registration.role.unwrap_or(Role::Viewer),
            }),
        )
        .await
        .map_err(|err| match err {
            StoreError::Conflict(constraint) => Error::Conflict(constraint),
            other => Error::Store(other),
        })?;

        info!(account_id = %account.id, role = ?account.role, "Account registered");
        Ok(account.identity())
    }

    /// # Errors
    /// `Forbidden` unless `actor` is an admin, `NotFound` for unknown targets.
    #[instrument(skip(self))]
    pub async fn set_role(&self, actor: Uuid, account_id: Uuid, role: Role) -> Result<()> {
        self.guard.require(actor, AccessLevel::ADMIN).await?;
        if !with_timeout(self.timeout, self.accounts.set_role(account_id, role)).await? {
            return Err(Error::NotFound("account"));
        }
        info!("Role changed");
        Ok(())
    }

    /// Soft delete: flag the account inactive and end all of its sessions.
    ///
    /// # Errors
    /// `Forbidden` unless `actor` is an admin, `NotFound` for unknown targets.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, actor: Uuid, account_id: Uuid) -> Result<u64> {
        self.guard.require(actor, AccessLevel::ADMIN).await?;
        if !with_timeout(self.timeout, self.accounts.set_active(account_id, false)).await? {
            return Err(Error::NotFound("account"));
        }
        let revoked = with_timeout(
            self.timeout,
            self.sessions.revoke_all_for_account(account_id),
        )
        .await?;
        info!(revoked, "Account deactivated");
        Ok(revoked)
    }

    /// # Errors
    /// `Forbidden` unless `actor` is an admin, `NotFound` for unknown targets.
    #[instrument(skip(self))]
    pub async fn reactivate(&self, actor: Uuid, account_id: Uuid) -> Result<()> {
        self.guard.require(actor, AccessLevel::ADMIN).await?;
        if !with_timeout(self.timeout, self.accounts.set_active(account_id, true)).await? {
            return Err(Error::NotFound("account"));
        }
        info!("Account reactivated");
        Ok(())
    }

    /// Clear the failed-attempt counter and any lockout.
    ///
    /// # Errors
    /// `Forbidden` unless `actor` is an admin, `NotFound` for unknown targets.
    #[instrument(skip(self))]
    pub async fn unlock(&self, actor: Uuid, account_id: Uuid) -> Result<()> {
        self.guard.require(actor, AccessLevel::ADMIN).await?;
        self.existing(account_id).await?;
        with_timeout(self.timeout, self.accounts.reset_failed_attempts(account_id)).await?;
        info!("Account unlocked");
        Ok(())
    }

    /// Replace the password after checking the current one. Every session of
    /// the account is revoked, including the one making the call.
    ///
    /// A wrong `current` counts toward the same lockout as a failed login.
    ///
    /// # Errors
    /// `AuthenticationDenied(BadPassword)` when `current` does not match,
    /// `AuthenticationDenied(Locked)` while the account is locked out,
    /// `Validation` when `new` is too short.
    #[instrument(skip(self, current, new))]
    pub async fn change_password(&self, account_id: Uuid, current: &str, new: &str) -> Result<()> {
        if !valid_password(new) {
            return Err(ValidationError::Password.into());
        }
        let account = self.existing(account_id).await?;
        let now = self.clock.now();
        if account.locked_at(now) {
            return Err(Error::AuthenticationDenied(DenialReason::Locked));
        }
        if !self
            .hasher
            .verify_blocking(current, account.credential())
            .await?
        {
            let failures =
                record_failure(self.accounts.as_ref(), &self.config, account_id, now).await?;
            warn!(failures, "Password change with a wrong current password");
            return Err(Error::AuthenticationDenied(DenialReason::BadPassword));
        }
        with_timeout(self.timeout, self.accounts.reset_failed_attempts(account_id)).await?;
        self.store_password(account_id, new).await?;
        let revoked = with_timeout(
            self.timeout,
            self.sessions.revoke_all_for_account(account_id),
        )
        .await?;
        info!(revoked, "Password changed");
        Ok(())
    }

    /// Latest login attempts for `account_id`, newest first, at most
    /// [`MAX_ATTEMPTS_PAGE`].
    ///
    /// # Errors
    /// `Forbidden` unless `actor` is an admin.
    pub async fn recent_attempts(
        &self,
        actor: Uuid,
        account_id: Uuid,
        limit: u32,
    ) -> Result<Vec<LoginAttempt>> {
        self.guard.require(actor, AccessLevel::ADMIN).await?;
        let limit = limit.clamp(1, MAX_ATTEMPTS_PAGE);
        Ok(with_timeout(self.timeout, self.audit.recent_attempts(account_id, limit)).await?)
    }

    pub(crate) async fn store_password(&self, account_id: Uuid, password: &str) -> Result<()> {
        let record = self.hasher.hash_blocking(password).await?;
        let encoded = record
            .encoded()
            .ok_or_else(|| anyhow::anyhow!("hasher produced a non-current record"))?;
        with_timeout(
            self.timeout,
            self.accounts.update_password_hash(account_id, encoded),
        )
        .await?;
        Ok(())
    }

    async fn existing(&self, account_id: Uuid) -> Result<Account> {
        with_timeout(self.timeout, self.accounts.fetch_by_id(account_id))
            .await?
            .ok_or(Error::NotFound("account"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock, crypto::password::MIN_ITERATIONS, model::NewSession,
        store::MemoryStore,
    };
    use chrono::{Duration as ChronoDuration, Utc};

    fn service(store: &MemoryStore) -> AccountService {
        let shared = Arc::new(store.clone());
        AccountService::new(
            shared.clone(),
            shared.clone(),
            shared.clone(),
            PermissionGuard::new(shared, Duration::from_secs(1)),
            CredentialHasher::new(MIN_ITERATIONS),
            Arc::new(SystemClock),
            AuthConfig::new().with_max_failed_attempts(3),
        )
    }

    fn registration(username: &str, role: Option<Role>) -> Registration {
        Registration {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "password-123".to_string(),
            display_name: None,
            role,
        }
    }

    #[tokio::test]
    async fn register_normalizes_and_defaults_to_viewer() {
        let store = MemoryStore::default();
        let accounts = service(&store);
        let identity = accounts
            .register(Registration {
                email: " Rui@Example.COM ".to_string(),
                ..registration("Rui", None)
            })
            .await
            .unwrap();
        assert_eq!(identity.username, "rui");
        assert_eq!(identity.email, "rui@example.com");
        let stored = store.fetch_by_id(identity.account_id).await.unwrap().unwrap();
        assert_eq!(stored.role, Some(Role::Viewer));
        assert!(stored.password_hash.starts_with("pbkdf2-sha256$"));
    }

    #[tokio::test]
    async fn register_rejects_bad_input_and_duplicates() {
        let store = MemoryStore::default();
        let accounts = service(&store);
        let short = Registration {
            password: "short".to_string(),
            ..registration("rui", None)
        };
        assert!(matches!(
            accounts.register(short).await,
            Err(Error::Validation(ValidationError::Password))
        ));
        let bad_email = Registration {
            email: "nope".to_string(),
            ..registration("rui", None)
        };
        assert!(matches!(
            accounts.register(bad_email).await,
            Err(Error::Validation(ValidationError::Email))
        ));

        accounts.register(registration("rui", None)).await.unwrap();
        assert!(matches!(
            accounts.register(registration("RUI", None)).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn admin_operations_require_admin() {
        let store = MemoryStore::default();
        let accounts = service(&store);
        let manager = accounts
            .register(registration("manager", Some(Role::Manager)))
            .await
            .unwrap();
        let admin = accounts
            .register(registration("admin", Some(Role::Admin)))
            .await
            .unwrap();
        let target = accounts.register(registration("target", None)).await.unwrap();

        assert!(matches!(
            accounts
                .set_role(manager.account_id, target.account_id, Role::Analyst)
                .await,
            Err(Error::Forbidden)
        ));
        accounts
            .set_role(admin.account_id, target.account_id, Role::Analyst)
            .await
            .unwrap();
        let stored = store.fetch_by_id(target.account_id).await.unwrap().unwrap();
        assert_eq!(stored.role, Some(Role::Analyst));

        assert!(matches!(
            accounts
                .set_role(admin.account_id, Uuid::new_v4(), Role::Analyst)
                .await,
            Err(Error::NotFound("account"))
        ));
    }

    #[tokio::test]
    async fn deactivate_revokes_sessions_and_unlock_clears_lockout() {
        let store = MemoryStore::default();
        let accounts = service(&store);
        let admin = accounts
            .register(registration("admin", Some(Role::Admin)))
            .await
            .unwrap();
        let target = accounts.register(registration("target", None)).await.unwrap();
        SessionStore::create(
            &store,
            NewSession {
                account_id: target.account_id,
                token_hash: vec![7],
                refresh_hash: vec![8],
                ip: None,
                user_agent: None,
                expires_at: Utc::now() + ChronoDuration::hours(1),
            },
        )
        .await
        .unwrap();

        store.record_failed_attempt(target.account_id).await.unwrap();
        store
            .lock_until(target.account_id, Utc::now() + ChronoDuration::minutes(15))
            .await
            .unwrap();
        accounts
            .unlock(admin.account_id, target.account_id)
            .await
            .unwrap();
        assert_eq!(store.failed_attempts(target.account_id), Some(0));
        assert!(!store.is_locked(target.account_id).await.unwrap());

        let revoked = accounts
            .deactivate(admin.account_id, target.account_id)
            .await
            .unwrap();
        assert_eq!(revoked, 1);
        let stored = store.fetch_by_id(target.account_id).await.unwrap().unwrap();
        assert!(!stored.active);

        accounts
            .reactivate(admin.account_id, target.account_id)
            .await
            .unwrap();
        let stored = store.fetch_by_id(target.account_id).await.unwrap().unwrap();
        assert!(stored.active);
    }

    #[tokio::test]
    async fn change_password_checks_current() {
        let store = MemoryStore::default();
        let accounts = service(&store);
        let user = accounts.register(registration("user", None)).await.unwrap();
        let err = accounts
            .change_password(user.account_id, "not-it-123", "new-password-1")
            .await
            .unwrap_err();
        assert_eq!(err.denial_reason(), Some(DenialReason::BadPassword));

        accounts
            .change_password(user.account_id, "password-123", "new-password-1")
            .await
            .unwrap();
        let stored = store.fetch_by_id(user.account_id).await.unwrap().unwrap();
        assert!(CredentialHasher::new(MIN_ITERATIONS).verify("new-password-1", &stored.credential()));
        assert_eq!(store.failed_attempts(user.account_id), Some(0));
    }

    #[tokio::test]
    async fn wrong_current_passwords_lock_the_account() {
        let store = MemoryStore::default();
        let accounts = service(&store);
        let user = accounts.register(registration("user", None)).await.unwrap();
        for attempt in 1..=3 {
            let err = accounts
                .change_password(user.account_id, "guess-number-x", "new-password-1")
                .await
                .unwrap_err();
            assert_eq!(
                err.denial_reason(),
                Some(DenialReason::BadPassword),
                "attempt {attempt}"
            );
        }
        assert_eq!(store.failed_attempts(user.account_id), Some(3));
        assert!(store.is_locked(user.account_id).await.unwrap());

        let err = accounts
            .change_password(user.account_id, "password-123", "new-password-1")
            .await
            .unwrap_err();
        assert_eq!(err.denial_reason(), Some(DenialReason::Locked));
        let stored = store.fetch_by_id(user.account_id).await.unwrap().unwrap();
        assert!(CredentialHasher::new(MIN_ITERATIONS).verify("password-123", &stored.credential()));
    }
}

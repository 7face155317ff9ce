//! Login, logout, refresh and session resolution.
//!
//! A login walks `identifier_lookup -> status_check -> lockout_check ->
//! password_check -> session_created`; every gate can exit with a
//! `DenialReason`. The current stage is recorded on the `auth.login` span.

use std::sync::Arc;
use tracing::{debug, field, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::{
    config::AuthConfig,
    lockout::record_failure,
    tokens::{hash_token, TokenPair},
};
use crate::{
    audit::{AuditLogger, ClientInfo},
    clock::Clock,
    crypto::{CredentialHasher, HashRecord},
    error::{Error, Result},
    model::{Account, DenialReason, Identity, NewSession, Session},
    store::{with_timeout, AccountStore, SessionStore, StoreError},
};

/// Identifier recorded for refresh attempts whose token matched nothing.
const UNRESOLVED_REFRESH: &str = "refresh_token";

/// Successful login or refresh.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub identity: Identity,
    pub session: Session,
    pub tokens: TokenPair,
}

/// An active session joined to its account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub identity: Identity,
    pub session: Session,
}

#[derive(Clone)]
pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionStore>,
    audit: AuditLogger,
    hasher: CredentialHasher,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("hasher", &self.hasher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn stage(name: &'static str) {
    Span::current().record("stage", name);
}

impl AuthService {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionStore>,
        audit: AuditLogger,
        hasher: CredentialHasher,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            accounts,
            sessions,
            audit,
            hasher,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verify credentials and open a session.
    ///
    /// Every outcome, including storage timeouts, is written to the audit trail.
    ///
    /// # Errors
    /// `AuthenticationDenied` with the gate that refused; storage failures other
    /// than timeouts propagate as `Error::Store`.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<SessionGrant> {
        let span = info_span!(
            "auth.login",
            stage = field::Empty,
            account_id = field::Empty,
            outcome = field::Empty
        );

        async {
            let mut resolved = None;
            let result = self
                .authenticate(identifier, password, client, &mut resolved)
                .await
                .map_err(denied_on_timeout);

            match &result {
                Ok(grant) => {
                    Span::current().record("outcome", "success");
                    self.audit
                        .log_attempt(identifier, client, Ok(grant.identity.account_id))
                        .await;
                }
                Err(Error::AuthenticationDenied(reason)) => {
                    Span::current().record("outcome", reason.as_str());
                    self.audit
                        .log_attempt(identifier, client, Err((resolved, *reason)))
                        .await;
                }
                Err(err) => {
                    Span::current().record("outcome", "error");
                    warn!(error = %err, "Login aborted by a storage failure");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
        client: &ClientInfo,
        resolved: &mut Option<Uuid>,
    ) -> Result<SessionGrant> {
        stage("identifier_lookup");
        let Some(account) = self
            .bounded(self.accounts.fetch_by_identifier(identifier))
            .await?
        else {
            self.verify_decoy(password).await;
            return Err(Error::AuthenticationDenied(DenialReason::UnknownIdentifier));
        };
        *resolved = Some(account.id);
        Span::current().record("account_id", field::display(account.id));

        stage("status_check");
        if !account.active {
            self.verify_decoy(password).await;
            return Err(Error::AuthenticationDenied(DenialReason::Inactive));
        }

        stage("lockout_check");
        let now = self.clock.now();
        if account.locked_at(now) {
            self.verify_decoy(password).await;
            return Err(Error::AuthenticationDenied(DenialReason::Locked));
        }
        if account.lockout_until.is_some() {
            // Lockout elapsed: start the next window from a clean counter.
            debug!("Clearing expired lockout");
            self.bounded(self.accounts.reset_failed_attempts(account.id))
                .await?;
        }

        stage("password_check");
        let record = account.credential();
        // Unsupported records fail without hashing; check the decoy so they cost the same.
        let checked = match record {
            HashRecord::Unsupported => self.hasher.decoy(),
            _ => record.clone(),
        };
        let valid = self.hasher.verify_blocking(password, checked).await?;
        if !valid {
            record_failure(self.accounts.as_ref(), &self.config, account.id, now).await?;
            return Err(Error::AuthenticationDenied(DenialReason::BadPassword));
        }

        self.bounded(self.accounts.reset_failed_attempts(account.id))
            .await?;
        self.bounded(
            self.accounts
                .record_successful_login(account.id, client.ip.as_deref()),
        )
        .await?;
        if self.hasher.needs_rehash(&record) {
            self.upgrade_hash(&account, password).await;
        }

        let (session, tokens) = self.open_session(account.id, client).await?;
        stage("session_created");

        let mut identity = account.identity();
        identity.last_login_at = Some(now);
        Ok(SessionGrant {
            identity,
            session,
            tokens,
        })
    }

    /// Pay for one full-cost verification that cannot succeed, so denials
    /// before the password gate take as long as a wrong password.
    async fn verify_decoy(&self, password: &str) {
        if let Err(err) = self
            .hasher
            .verify_blocking(password, self.hasher.decoy())
            .await
        {
            warn!(error = %err, "Decoy password verification failed");
        }
    }

    /// Replace a legacy or weaker hash after a successful login. Failure keeps the old hash.
    async fn upgrade_hash(&self, account: &Account, password: &str) {
        let upgraded = match self.hasher.hash_blocking(password).await {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "Failed to compute upgraded password hash");
                return;
            }
        };
        let Some(encoded) = upgraded.encoded() else {
            return;
        };
        match self
            .bounded(self.accounts.update_password_hash(account.id, encoded))
            .await
        {
            Ok(()) => info!(account_id = %account.id, "Password hash upgraded"),
            Err(err) => warn!(error = %err, "Failed to store upgraded password hash"),
        }
    }

    async fn open_session(
        &self,
        account_id: Uuid,
        client: &ClientInfo,
    ) -> Result<(Session, TokenPair)> {
        let tokens = TokenPair::generate()?;
        let session = self
            .bounded(self.sessions.create(self.new_session(account_id, client, &tokens)))
            .await?;
        Ok((session, tokens))
    }

    fn new_session(&self, account_id: Uuid, client: &ClientInfo, tokens: &TokenPair) -> NewSession {
        NewSession {
            account_id,
            token_hash: hash_token(&tokens.session_token),
            refresh_hash: hash_token(&tokens.refresh_token),
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            expires_at: self.clock.now() + self.config.session_ttl(),
        }
    }

    /// Revoke the session behind `session_token`. Unknown or already revoked
    /// tokens are not an error; the return value says whether anything changed.
    ///
    /// # Errors
    /// Storage failures.
    pub async fn logout(&self, session_token: &str) -> Result<bool> {
        let token_hash = hash_token(session_token);
        let Some(session) = self
            .bounded(self.sessions.fetch_active_by_token(&token_hash))
            .await?
        else {
            debug!("Logout for unknown or inactive session");
            return Ok(false);
        };
        let revoked = self.bounded(self.sessions.revoke(session.id)).await?;
        info!(session_id = %session.id, revoked, "Session logged out");
        Ok(revoked)
    }

    /// Trade a refresh token for a new session. The old session is revoked
    /// in the same storage step, so a refresh token works exactly once.
    ///
    /// # Errors
    /// `AuthenticationDenied(InvalidToken)` for unknown, stale or already used
    /// tokens, `AuthenticationDenied(Inactive)` when the account was disabled.
    pub async fn refresh(&self, refresh_token: &str, client: &ClientInfo) -> Result<SessionGrant> {
        let span = info_span!("auth.refresh", account_id = field::Empty);
        async {
            let mut identifier = UNRESOLVED_REFRESH.to_string();
            let mut resolved = None;
            let result = self
                .rotate(refresh_token, client, &mut identifier, &mut resolved)
                .await
                .map_err(denied_on_timeout);

            match &result {
                Ok(grant) => {
                    self.audit
                        .log_attempt(&identifier, client, Ok(grant.identity.account_id))
                        .await;
                }
                Err(Error::AuthenticationDenied(reason)) => {
                    self.audit
                        .log_attempt(&identifier, client, Err((resolved, *reason)))
                        .await;
                }
                Err(err) => warn!(error = %err, "Refresh aborted by a storage failure"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn rotate(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
        identifier: &mut String,
        resolved: &mut Option<Uuid>,
    ) -> Result<SessionGrant> {
        let refresh_hash = hash_token(refresh_token);
        let Some(current) = self
            .bounded(self.sessions.fetch_active_by_refresh(&refresh_hash))
            .await?
        else {
            return Err(Error::AuthenticationDenied(DenialReason::InvalidToken));
        };
        *resolved = Some(current.account_id);
        Span::current().record("account_id", field::display(current.account_id));

        let account = self
            .bounded(self.accounts.fetch_by_id(current.account_id))
            .await?;
        let Some(account) = account else {
            return Err(Error::AuthenticationDenied(DenialReason::InvalidToken));
        };
        identifier.clone_from(&account.username);
        if !account.active {
            self.bounded(self.sessions.revoke(current.id)).await?;
            return Err(Error::AuthenticationDenied(DenialReason::Inactive));
        }

        let tokens = TokenPair::generate()?;
        let replacement = self.new_session(account.id, client, &tokens);
        let Some(session) = self
            .bounded(self.sessions.rotate(current.id, replacement))
            .await?
        else {
            // Another request rotated this session first.
            return Err(Error::AuthenticationDenied(DenialReason::InvalidToken));
        };

        debug!(old = %current.id, new = %session.id, "Session rotated");
        Ok(SessionGrant {
            identity: account.identity(),
            session,
            tokens,
        })
    }

    /// Public identity behind an active session token.
    ///
    /// # Errors
    /// Storage failures.
    pub async fn resolve(&self, session_token: &str) -> Result<Option<Identity>> {
        Ok(self
            .resolve_session(session_token)
            .await?
            .map(|resolved| resolved.identity))
    }

    /// Like [`resolve`](Self::resolve), keeping the session row. Sessions of
    /// deactivated or missing accounts do not resolve.
    ///
    /// # Errors
    /// Storage failures.
    pub async fn resolve_session(&self, session_token: &str) -> Result<Option<ResolvedSession>> {
        let token_hash = hash_token(session_token);
        let Some(session) = self
            .bounded(self.sessions.fetch_active_by_token(&token_hash))
            .await?
        else {
            return Ok(None);
        };
        let account = self
            .bounded(self.accounts.fetch_by_id(session.account_id))
            .await?;
        Ok(account
            .filter(|account| account.active)
            .map(|account| ResolvedSession {
                identity: account.identity(),
                session,
            }))
    }

    /// Newest first.
    ///
    /// # Errors
    /// Storage failures.
    pub async fn list_sessions(&self, account_id: Uuid) -> Result<Vec<Session>> {
        self.bounded(self.sessions.list_active_for_account(account_id))
            .await
    }

    /// # Errors
    /// Storage failures.
    pub async fn revoke_all(&self, account_id: Uuid) -> Result<u64> {
        let revoked = self
            .bounded(self.sessions.revoke_all_for_account(account_id))
            .await?;
        info!(%account_id, revoked, "Revoked all sessions");
        Ok(revoked)
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        Ok(with_timeout(self.config.storage_timeout(), call).await?)
    }
}

fn denied_on_timeout(err: Error) -> Error {
    match err {
        Error::Store(StoreError::Timeout) => Error::AuthenticationDenied(DenialReason::Timeout),
        other => other,
    }
}

mod common;

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{Harness, PASSWORD};
use sigma::{
    audit::{AuditLogger, ClientInfo},
    auth::{AuthConfig, AuthService},
    clock::{Clock, SystemClock},
    crypto::{password::MIN_ITERATIONS, CredentialHasher},
    model::{Account, DenialReason, LoginAttempt, NewAccount, Role, SensitiveAccess},
    store::{AccountStore, AuditSink, MemoryStore, StoreError},
    Error,
};
use std::{sync::Arc, time::Instant};
use uuid::Uuid;

fn client() -> ClientInfo {
    ClientInfo::new(Some("198.51.100.7".to_string()), Some("it/1.0".to_string()))
}

fn denial(result: sigma::Result<impl Sized>) -> Option<DenialReason> {
    result.err().and_then(|err| err.denial_reason())
}

#[tokio::test]
async fn lockout_after_max_failures_and_recovery_after_window() -> Result<()> {
    let h = Harness::new()?;
    let identity = h.register("carla", Role::Operator).await?;
    let auth = &h.state.auth;

    for attempt in 1..=5 {
        let reason = denial(auth.login("carla", "wrong password", &client()).await);
        ensure!(
            reason == Some(DenialReason::BadPassword),
            "attempt {attempt}: {reason:?}"
        );
    }
    ensure!(h.store.failed_attempts(identity.account_id) == Some(5));

    // Correct password while locked: refused, counter untouched.
    let reason = denial(auth.login("carla", PASSWORD, &client()).await);
    ensure!(reason == Some(DenialReason::Locked), "{reason:?}");
    ensure!(h.store.failed_attempts(identity.account_id) == Some(5));

    h.clock.advance(Duration::minutes(16));
    let grant = auth
        .login("carla@example.com", PASSWORD, &client())
        .await
        .context("login after lockout window")?;
    ensure!(grant.identity.account_id == identity.account_id);
    ensure!(h.store.failed_attempts(identity.account_id) == Some(0));

    let reasons: Vec<_> = h
        .store
        .login_attempts()
        .into_iter()
        .map(|attempt| attempt.reason)
        .collect();
    ensure!(reasons.len() == 7);
    ensure!(reasons[5].as_deref() == Some("locked"));
    ensure!(reasons[6].is_none());
    Ok(())
}

#[tokio::test]
async fn denials_are_indistinguishable_to_callers() -> Result<()> {
    let h = Harness::new()?;
    h.register("dora", Role::Viewer).await?;

    let unknown = h
        .state
        .auth
        .login("nobody", PASSWORD, &client())
        .await
        .err()
        .context("unknown identifier must fail")?;
    let wrong = h
        .state
        .auth
        .login("dora", "not the password", &client())
        .await
        .err()
        .context("wrong password must fail")?;
    ensure!(unknown.to_string() == wrong.to_string());
    ensure!(unknown.denial_reason() == Some(DenialReason::UnknownIdentifier));
    ensure!(wrong.denial_reason() == Some(DenialReason::BadPassword));
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_and_old_tokens_die() -> Result<()> {
    let h = Harness::new()?;
    h.register("edu", Role::Analyst).await?;
    let auth = &h.state.auth;

    let first = auth.login("edu", PASSWORD, &client()).await?;
    let second = auth
        .refresh(&first.tokens.refresh_token, &client())
        .await
        .context("first refresh")?;

    ensure!(second.tokens.session_token != first.tokens.session_token);
    ensure!(auth.resolve(&first.tokens.session_token).await?.is_none());
    ensure!(auth.resolve(&second.tokens.session_token).await?.is_some());

    let replay = denial(auth.refresh(&first.tokens.refresh_token, &client()).await);
    ensure!(replay == Some(DenialReason::InvalidToken), "{replay:?}");
    Ok(())
}

#[tokio::test]
async fn concurrent_refreshes_produce_one_winner() -> Result<()> {
    let h = Harness::new()?;
    h.register("fabi", Role::Viewer).await?;
    let auth = &h.state.auth;
    let grant = auth.login("fabi", PASSWORD, &client()).await?;
    let token = grant.tokens.refresh_token.clone();

    let (client_a, client_b) = (client(), client());
    let (a, b) = tokio::join!(
        auth.refresh(&token, &client_a),
        auth.refresh(&token, &client_b)
    );
    ensure!(
        a.is_ok() != b.is_ok(),
        "exactly one refresh must succeed: {:?} / {:?}",
        a.as_ref().err(),
        b.as_ref().err()
    );
    let sessions = auth.list_sessions(grant.identity.account_id).await?;
    ensure!(sessions.len() == 1);
    Ok(())
}

#[tokio::test]
async fn logout_is_idempotent() -> Result<()> {
    let h = Harness::new()?;
    h.register("gil", Role::Viewer).await?;
    let auth = &h.state.auth;
    let grant = auth.login("gil", PASSWORD, &client()).await?;

    ensure!(auth.logout(&grant.tokens.session_token).await?);
    ensure!(!auth.logout(&grant.tokens.session_token).await?);
    ensure!(!auth.logout("never-issued").await?);
    ensure!(auth.resolve(&grant.tokens.session_token).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn audit_failures_never_block_login() -> Result<()> {
    let h = Harness::new()?;
    h.register("hana", Role::Viewer).await?;
    h.store.set_audit_failure(true);

    let grant = h.state.auth.login("hana", PASSWORD, &client()).await;
    ensure!(grant.is_ok(), "login failed: {:?}", grant.err());
    ensure!(h.store.login_attempts().is_empty());
    Ok(())
}

#[tokio::test]
async fn early_denials_cost_as_much_as_a_wrong_password() -> Result<()> {
    let h = Harness::new()?;
    h.register("dora", Role::Operator).await?;
    let retired = h.register("enzo", Role::Operator).await?;
    h.store.set_active(retired.account_id, false).await?;
    let auth = &h.state.auth;

    let mut unknown = std::time::Duration::MAX;
    let mut inactive = std::time::Duration::MAX;
    let mut wrong = std::time::Duration::MAX;
    for _ in 0..3 {
        let started = Instant::now();
        let reason = denial(auth.login("nobody", "not the password", &client()).await);
        unknown = unknown.min(started.elapsed());
        ensure!(reason == Some(DenialReason::UnknownIdentifier));

        let started = Instant::now();
        let reason = denial(auth.login("enzo", "not the password", &client()).await);
        inactive = inactive.min(started.elapsed());
        ensure!(reason == Some(DenialReason::Inactive));

        let started = Instant::now();
        let reason = denial(auth.login("dora", "not the password", &client()).await);
        wrong = wrong.min(started.elapsed());
        ensure!(reason == Some(DenialReason::BadPassword));
    }

    ensure!(
        unknown * 3 >= wrong && inactive * 3 >= wrong,
        "unknown={unknown:?} inactive={inactive:?} wrong password={wrong:?}"
    );
    Ok(())
}

/// Audit sink that never answers.
struct StalledAudit;

#[async_trait]
impl AuditSink for StalledAudit {
    async fn append_attempt(&self, _attempt: &LoginAttempt) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn append_access(&self, _access: &SensitiveAccess) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn recent_attempts(
        &self,
        _account_id: Uuid,
        _limit: u32,
    ) -> Result<Vec<LoginAttempt>, StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn stalled_audit_sink_does_not_hang_login() -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = MemoryStore::new(clock.clone());
    let hasher = CredentialHasher::new(MIN_ITERATIONS);
    let record = hasher.hash(PASSWORD);
    AccountStore::create(
        &store,
        NewAccount {
            username: "iara".to_string(),
            email: "iara@example.com".to_string(),
            display_name: None,
            password_hash: record.encoded().context("current record")?.to_string(),
            role: Role::Viewer,
        },
    )
    .await?;
    let shared = Arc::new(store);
    let auth = AuthService::new(
        shared.clone(),
        shared,
        AuditLogger::new(
            Arc::new(StalledAudit),
            clock.clone(),
            std::time::Duration::from_millis(100),
        ),
        hasher,
        clock,
        AuthConfig::new().with_storage_timeout_ms(100),
    );

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        auth.login("iara", PASSWORD, &client()),
    )
    .await
    .context("login waited on the audit sink")?;
    let grant = outcome?;

    let denied = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        auth.refresh("never-issued", &client()),
    )
    .await
    .context("refresh waited on the audit sink")?;
    ensure!(denial(denied) == Some(DenialReason::InvalidToken));
    ensure!(auth.resolve(&grant.tokens.session_token).await?.is_some());
    Ok(())
}

/// Account store whose identifier lookup hangs.
struct SlowAccounts {
    inner: MemoryStore,
    delay: std::time::Duration,
}

#[async_trait]
impl AccountStore for SlowAccounts {
    async fn fetch_by_identifier(&self, identifier: &str) -> Result<Option<Account>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_by_identifier(identifier).await
    }

    async fn fetch_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        self.inner.fetch_by_id(account_id).await
    }

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError> {
        AccountStore::create(&self.inner, account).await
    }

    async fn record_failed_attempt(&self, account_id: Uuid) -> Result<i32, StoreError> {
        self.inner.record_failed_attempt(account_id).await
    }

    async fn reset_failed_attempts(&self, account_id: Uuid) -> Result<(), StoreError> {
        self.inner.reset_failed_attempts(account_id).await
    }

    async fn record_successful_login(
        &self,
        account_id: Uuid,
        ip: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.record_successful_login(account_id, ip).await
    }

    async fn lock_until(&self, account_id: Uuid, until: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.lock_until(account_id, until).await
    }

    async fn is_locked(&self, account_id: Uuid) -> Result<bool, StoreError> {
        self.inner.is_locked(account_id).await
    }

    async fn update_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        self.inner.update_password_hash(account_id, password_hash).await
    }

    async fn set_role(&self, account_id: Uuid, role: Role) -> Result<bool, StoreError> {
        self.inner.set_role(account_id, role).await
    }

    async fn set_active(&self, account_id: Uuid, active: bool) -> Result<bool, StoreError> {
        self.inner.set_active(account_id, active).await
    }

    async fn mark_email_verified(&self, account_id: Uuid) -> Result<(), StoreError> {
        self.inner.mark_email_verified(account_id).await
    }
}

#[tokio::test]
async fn storage_timeout_is_a_denial_and_is_audited() -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = MemoryStore::new(clock.clone());
    let shared = Arc::new(store.clone());
    let auth = AuthService::new(
        Arc::new(SlowAccounts {
            inner: store.clone(),
            delay: std::time::Duration::from_millis(500),
        }),
        shared.clone(),
        AuditLogger::new(shared, clock.clone(), std::time::Duration::from_millis(50)),
        CredentialHasher::new(MIN_ITERATIONS),
        clock,
        AuthConfig::new().with_storage_timeout_ms(50),
    );

    let err = auth
        .login("ivo", PASSWORD, &client())
        .await
        .err()
        .context("a hung lookup must not succeed")?;
    ensure!(matches!(err, Error::AuthenticationDenied(DenialReason::Timeout)));

    let attempts = store.login_attempts();
    ensure!(attempts.len() == 1);
    ensure!(!attempts[0].success);
    ensure!(attempts[0].reason.as_deref() == Some("timeout"));
    ensure!(attempts[0].identifier == "ivo");
    Ok(())
}

//! In-process store used by tests and local runs without PostgreSQL.
//!
//! One mutex guards all tables, so every trait method is atomic with respect
//! to the others, matching the row-level guarantees of the SQL backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use uuid::Uuid;

use super::{AccountStore, AuditSink, Ping, RecoveryTokenStore, SessionStore, StoreError};
use crate::{
    clock::{Clock, SystemClock},
    model::{
        Account, LoginAttempt, NewAccount, NewRecoveryToken, NewSession, Role, SensitiveAccess,
        Session, TokenKind,
    },
};

struct StoredSession {
    session: Session,
    token_hash: Vec<u8>,
    refresh_hash: Vec<u8>,
}

struct StoredToken {
    account_id: Uuid,
    kind: TokenKind,
    token_hash: Vec<u8>,
    expires_at: DateTime<Utc>,
    used: bool,
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    sessions: HashMap<Uuid, StoredSession>,
    attempts: Vec<LoginAttempt>,
    accesses: Vec<SensitiveAccess>,
    tokens: Vec<StoredToken>,
}

#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    clock: Arc<dyn Clock>,
    fail_audit: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            clock,
            fail_audit: Arc::new(AtomicBool::new(false)),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every audit append fail, to exercise the best-effort path.
    pub fn set_audit_failure(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn login_attempts(&self) -> Vec<LoginAttempt> {
        self.tables().attempts.clone()
    }

    #[must_use]
    pub fn sensitive_accesses(&self) -> Vec<SensitiveAccess> {
        self.tables().accesses.clone()
    }

    /// Raw counter, for assertions.
    #[must_use]
    pub fn failed_attempts(&self, account_id: Uuid) -> Option<i32> {
        self.tables()
            .accounts
            .get(&account_id)
            .map(|account| account.failed_attempts)
    }

    /// Insert a row with an arbitrary stored credential (legacy hashes, odd role tags).
    pub fn insert_account(&self, account: Account) {
        self.tables().accounts.insert(account.id, account);
    }

    fn with_account<T>(
        &self,
        account_id: Uuid,
        f: impl FnOnce(&mut Account) -> T,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables();
        let account = tables
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("account {account_id} not found")))?;
        Ok(f(account))
    }
}

#[async_trait]
impl Ping for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn fetch_by_identifier(&self, identifier: &str) -> Result<Option<Account>, StoreError> {
        let needle = identifier.trim().to_lowercase();
        Ok(self
            .tables()
            .accounts
            .values()
            .find(|a| a.username.to_lowercase() == needle || a.email.to_lowercase() == needle)
            .cloned())
    }

    async fn fetch_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.tables().accounts.get(&account_id).cloned())
    }

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut tables = self.tables();
        let username = account.username.to_lowercase();
        let email = account.email.to_lowercase();
        if tables.accounts.values().any(|a| a.username.to_lowercase() == username) {
            return Err(StoreError::Conflict("username".to_string()));
        }
        if tables.accounts.values().any(|a| a.email.to_lowercase() == email) {
            return Err(StoreError::Conflict("email".to_string()));
        }
        let created = Account {
            id: Uuid::now_v7(),
            username: account.username,
            email: account.email,
            display_name: account.display_name,
            password_hash: account.password_hash,
            password_salt: None,
            role: Some(account.role),
            active: true,
            email_verified: false,
            failed_attempts: 0,
            lockout_until: None,
            last_login_at: None,
            last_login_ip: None,
            created_at: self.clock.now(),
        };
        tables.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn record_failed_attempt(&self, account_id: Uuid) -> Result<i32, StoreError> {
        self.with_account(account_id, |account| {
            account.failed_attempts += 1;
            account.failed_attempts
        })
    }

    async fn reset_failed_attempts(&self, account_id: Uuid) -> Result<(), StoreError> {
        self.with_account(account_id, |account| {
            account.failed_attempts = 0;
            account.lockout_until = None;
        })
    }

    async fn record_successful_login(
        &self,
        account_id: Uuid,
        ip: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.with_account(account_id, |account| {
            account.last_login_at = Some(now);
            account.last_login_ip = ip.map(str::to_string);
        })
    }

    async fn lock_until(&self, account_id: Uuid, until: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_account(account_id, |account| account.lockout_until = Some(until))
    }

    async fn is_locked(&self, account_id: Uuid) -> Result<bool, StoreError> {
        let now = self.clock.now();
        self.with_account(account_id, |account| account.locked_at(now))
    }

    async fn update_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        self.with_account(account_id, |account| {
            account.password_hash = password_hash.to_string();
            account.password_salt = None;
        })
    }

    async fn set_role(&self, account_id: Uuid, role: Role) -> Result<bool, StoreError> {
        Ok(self
            .tables()
            .accounts
            .get_mut(&account_id)
            .map(|account| account.role = Some(role))
            .is_some())
    }

    async fn set_active(&self, account_id: Uuid, active: bool) -> Result<bool, StoreError> {
        Ok(self
            .tables()
            .accounts
            .get_mut(&account_id)
            .map(|account| account.active = active)
            .is_some())
    }

    async fn mark_email_verified(&self, account_id: Uuid) -> Result<(), StoreError> {
        self.with_account(account_id, |account| account.email_verified = true)
    }
}

fn insert_session(tables: &mut Tables, new: NewSession, now: DateTime<Utc>) -> Session {
    let session = Session {
        id: Uuid::now_v7(),
        account_id: new.account_id,
        created_at: now,
        expires_at: new.expires_at,
        revoked: false,
        revoked_at: None,
        ip: new.ip,
        user_agent: new.user_agent,
    };
    tables.sessions.insert(
        session.id,
        StoredSession {
            session: session.clone(),
            token_hash: new.token_hash,
            refresh_hash: new.refresh_hash,
        },
    );
    session
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: NewSession) -> Result<Session, StoreError> {
        let now = self.clock.now();
        Ok(insert_session(&mut self.tables(), session, now))
    }

    async fn fetch_active_by_token(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<Session>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .tables()
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash && s.session.is_active(now))
            .map(|s| s.session.clone()))
    }

    async fn fetch_active_by_refresh(
        &self,
        refresh_hash: &[u8],
    ) -> Result<Option<Session>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .tables()
            .sessions
            .values()
            .find(|s| s.refresh_hash == refresh_hash && s.session.is_active(now))
            .map(|s| s.session.clone()))
    }

    async fn revoke(&self, session_id: Uuid) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables();
        Ok(match tables.sessions.get_mut(&session_id) {
            Some(stored) if !stored.session.revoked => {
                stored.session.revoked = true;
                stored.session.revoked_at = Some(now);
                true
            }
            _ => false,
        })
    }

    async fn rotate(
        &self,
        old_session_id: Uuid,
        replacement: NewSession,
    ) -> Result<Option<Session>, StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables();
        match tables.sessions.get_mut(&old_session_id) {
            Some(stored) if stored.session.is_active(now) => {
                stored.session.revoked = true;
                stored.session.revoked_at = Some(now);
            }
            _ => return Ok(None),
        }
        Ok(Some(insert_session(&mut tables, replacement, now)))
    }

    async fn revoke_all_for_account(&self, account_id: Uuid) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut count = 0;
        for stored in self.tables().sessions.values_mut() {
            if stored.session.account_id == account_id && !stored.session.revoked {
                stored.session.revoked = true;
                stored.session.revoked_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_active_for_account(&self, account_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let now = self.clock.now();
        let mut sessions: Vec<Session> = self
            .tables()
            .sessions
            .values()
            .filter(|s| s.session.account_id == account_id && s.session.is_active(now))
            .map(|s| s.session.clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut count = 0;
        for stored in self.tables().sessions.values_mut() {
            if !stored.session.revoked && stored.session.expires_at <= now {
                stored.session.revoked = true;
                stored.session.revoked_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("audit sink unavailable")));
        }
        self.tables().attempts.push(attempt.clone());
        Ok(())
    }

    async fn append_access(&self, access: &SensitiveAccess) -> Result<(), StoreError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("audit sink unavailable")));
        }
        self.tables().accesses.push(access.clone());
        Ok(())
    }

    async fn recent_attempts(
        &self,
        account_id: Uuid,
        limit: u32,
    ) -> Result<Vec<LoginAttempt>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(self
            .tables()
            .attempts
            .iter()
            .rev()
            .filter(|attempt| attempt.account_id == Some(account_id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecoveryTokenStore for MemoryStore {
    async fn issue(&self, token: NewRecoveryToken) -> Result<(), StoreError> {
        let mut tables = self.tables();
        for existing in &mut tables.tokens {
            if existing.account_id == token.account_id && existing.kind == token.kind {
                existing.used = true;
            }
        }
        tables.tokens.push(StoredToken {
            account_id: token.account_id,
            kind: token.kind,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            used: false,
        });
        Ok(())
    }

    async fn consume(
        &self,
        token_hash: &[u8],
        kind: TokenKind,
    ) -> Result<Option<Uuid>, StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables();
        Ok(tables
            .tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash && t.kind == kind && !t.used && t.expires_at > now)
            .map(|token| {
                token.used = true;
                token.account_id
            }))
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables();
        let before = tables.tokens.len();
        tables.tokens.retain(|t| !t.used && t.expires_at > now);
        Ok(u64::try_from(before - tables.tokens.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    fn new_account(username: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            display_name: None,
            password_hash: "pbkdf2-sha256$1$AA$AA".to_string(),
            role: Role::Viewer,
        }
    }

    fn new_session(account_id: Uuid, tag: u8, expires_at: DateTime<Utc>) -> NewSession {
        NewSession {
            account_id,
            token_hash: vec![tag],
            refresh_hash: vec![tag, tag],
            ip: None,
            user_agent: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn identifier_lookup_is_case_insensitive() {
        let store = MemoryStore::default();
        let created = AccountStore::create(&store, new_account("maria")).await.unwrap();
        let by_name = store.fetch_by_identifier("MARIA").await.unwrap().unwrap();
        let by_email = store
            .fetch_by_identifier(" Maria@Example.com ")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, created.id);
        assert_eq!(by_email.id, created.id);
        assert!(store.fetch_by_identifier("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicates_conflict() {
        let store = MemoryStore::default();
        AccountStore::create(&store, new_account("joao")).await.unwrap();
        let err = AccountStore::create(&store, new_account("JOAO")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn failed_attempts_increment_and_reset() {
        let store = MemoryStore::default();
        let account = AccountStore::create(&store, new_account("ana")).await.unwrap();
        assert_eq!(store.record_failed_attempt(account.id).await.unwrap(), 1);
        assert_eq!(store.record_failed_attempt(account.id).await.unwrap(), 2);
        store
            .lock_until(account.id, Utc::now() + Duration::minutes(15))
            .await
            .unwrap();
        assert!(store.is_locked(account.id).await.unwrap());
        store.reset_failed_attempts(account.id).await.unwrap();
        assert_eq!(store.failed_attempts(account.id), Some(0));
        assert!(!store.is_locked(account.id).await.unwrap());
    }

    #[tokio::test]
    async fn rotate_only_succeeds_once() {
        let clock = ManualClock::default();
        let store = MemoryStore::new(Arc::new(clock.clone()));
        let expires = clock.now() + Duration::hours(1);
        let account_id = Uuid::new_v4();
        let old = SessionStore::create(&store, new_session(account_id, 1, expires))
            .await
            .unwrap();

        let rotated = store
            .rotate(old.id, new_session(account_id, 2, expires))
            .await
            .unwrap();
        assert!(rotated.is_some());
        let again = store
            .rotate(old.id, new_session(account_id, 3, expires))
            .await
            .unwrap();
        assert!(again.is_none());
        assert!(store.fetch_active_by_token(&[1]).await.unwrap().is_none());
        assert!(store.fetch_active_by_token(&[2]).await.unwrap().is_some());
        assert!(store.fetch_active_by_token(&[3]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_revokes_only_expired_sessions() {
        let clock = ManualClock::default();
        let store = MemoryStore::new(Arc::new(clock.clone()));
        let account_id = Uuid::new_v4();
        let now = clock.now();
        SessionStore::create(&store, new_session(account_id, 1, now + Duration::minutes(5)))
            .await
            .unwrap();
        SessionStore::create(&store, new_session(account_id, 2, now + Duration::hours(5)))
            .await
            .unwrap();

        clock.advance(Duration::minutes(10));
        assert_eq!(SessionStore::purge_expired(&store).await.unwrap(), 1);
        assert_eq!(SessionStore::purge_expired(&store).await.unwrap(), 0);
        assert_eq!(
            store.list_active_for_account(account_id).await.unwrap().len(),
            1
        );
        assert_eq!(store.revoke_all_for_account(account_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recovery_tokens_are_single_use_and_superseded() {
        let clock = ManualClock::default();
        let store = MemoryStore::new(Arc::new(clock.clone()));
        let account_id = Uuid::new_v4();
        let expires_at = clock.now() + Duration::hours(2);
        for hash in [vec![1], vec![2]] {
            store
                .issue(NewRecoveryToken {
                    account_id,
                    kind: TokenKind::PasswordReset,
                    token_hash: hash,
                    expires_at,
                })
                .await
                .unwrap();
        }

        assert_eq!(
            store.consume(&[1], TokenKind::PasswordReset).await.unwrap(),
            None
        );
        assert_eq!(
            store.consume(&[2], TokenKind::EmailVerification).await.unwrap(),
            None
        );
        assert_eq!(
            store.consume(&[2], TokenKind::PasswordReset).await.unwrap(),
            Some(account_id)
        );
        assert_eq!(
            store.consume(&[2], TokenKind::PasswordReset).await.unwrap(),
            None
        );
        assert_eq!(RecoveryTokenStore::purge_expired(&store).await.unwrap(), 2);
    }
}

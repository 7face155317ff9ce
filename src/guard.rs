//! Hierarchical authorization.
//!
//! The level is read from the account row on every call and never cached in
//! the session, so demotion or deactivation applies on the next request.

use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    model::AccessLevel,
    store::{with_timeout, AccountStore},
};

/// Proof that `account_id` passed a `require` check at `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorized {
    pub account_id: Uuid,
    pub level: AccessLevel,
}

#[derive(Clone)]
pub struct PermissionGuard {
    accounts: Arc<dyn AccountStore>,
    timeout: Duration,
}

impl std::fmt::Debug for PermissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGuard")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PermissionGuard {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountStore>, timeout: Duration) -> Self {
        Self { accounts, timeout }
    }

    /// `None` for unknown accounts and unrecognised role tags.
    ///
    /// # Errors
    /// Storage failures.
    pub async fn level_of(&self, account_id: Uuid) -> Result<Option<AccessLevel>> {
        let account = with_timeout(self.timeout, self.accounts.fetch_by_id(account_id)).await?;
        Ok(account.and_then(|account| account.access_level()))
    }

    /// # Errors
    /// `Forbidden` when the account is unknown, inactive, has no valid role,
    /// or sits below `min_level`. Storage failures pass through.
    #[instrument(skip(self))]
    pub async fn require(&self, account_id: Uuid, min_level: AccessLevel) -> Result<Authorized> {
        let Some(account) =
            with_timeout(self.timeout, self.accounts.fetch_by_id(account_id)).await?
        else {
            debug!("Unknown account");
            return Err(Error::Forbidden);
        };

        if !account.active {
            debug!("Account inactive");
            return Err(Error::Forbidden);
        }

        match account.access_level() {
            Some(level) if level >= min_level => Ok(Authorized { account_id, level }),
            level => {
                debug!(level = ?level, "Insufficient access level");
                Err(Error::Forbidden)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        model::{NewAccount, Role},
        store::MemoryStore,
    };

    async fn setup(role: Role) -> (PermissionGuard, MemoryStore, Uuid) {
        let store = MemoryStore::default();
        let account = AccountStore::create(
            &store,
            NewAccount {
                username: "clara".to_string(),
                email: "clara@example.com".to_string(),
                display_name: None,
                password_hash: String::new(),
                role,
            },
        )
        .await
        .unwrap();
        let guard = PermissionGuard::new(Arc::new(store.clone()), Duration::from_secs(1));
        (guard, store, account.id)
    }

    #[tokio::test]
    async fn require_is_monotonic_in_level() {
        for role in Role::ALL {
            let (guard, _, id) = setup(role).await;
            for level in 1..=5 {
                let min = AccessLevel::new(level).unwrap();
                let allowed = guard.require(id, min).await.is_ok();
                assert_eq!(allowed, role.level() >= min, "{role} at {level}");
            }
        }
    }

    #[tokio::test]
    async fn deactivation_revokes_even_the_lowest_level() {
        let (guard, store, id) = setup(Role::Admin).await;
        assert!(guard.require(id, AccessLevel::VIEWER).await.is_ok());
        store.set_active(id, false).await.unwrap();
        let err = guard.require(id, AccessLevel::VIEWER).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden));
        // the level itself is still readable
        assert_eq!(guard.level_of(id).await.unwrap(), Some(AccessLevel::ADMIN));
    }

    #[tokio::test]
    async fn unknown_account_and_unknown_role_are_forbidden() {
        let (guard, store, id) = setup(Role::Viewer).await;
        assert!(matches!(
            guard.require(Uuid::new_v4(), AccessLevel::VIEWER).await,
            Err(Error::Forbidden)
        ));

        let mut account = store.fetch_by_id(id).await.unwrap().unwrap();
        account.role = None;
        store.insert_account(account);
        assert_eq!(guard.level_of(id).await.unwrap(), None);
        assert!(matches!(
            guard.require(id, AccessLevel::VIEWER).await,
            Err(Error::Forbidden)
        ));
    }
}

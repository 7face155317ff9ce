//! Failed-attempt counting shared by every path that checks a password.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use super::config::AuthConfig;
use crate::{
    error::Result,
    store::{with_timeout, AccountStore},
};

/// Count one wrong password and lock the account once the limit is reached.
/// Returns the counter after the increment.
///
/// # Errors
/// Storage failures, including `StoreError::Timeout`.
pub(crate) async fn record_failure(
    accounts: &dyn AccountStore,
    config: &AuthConfig,
    account_id: Uuid,
    now: DateTime<Utc>,
) -> Result<i32> {
    let timeout = config.storage_timeout();
    let failures = with_timeout(timeout, accounts.record_failed_attempt(account_id)).await?;
    if failures >= config.max_failed_attempts() {
        let until = now + config.lockout();
        with_timeout(timeout, accounts.lock_until(account_id, until)).await?;
        info!(%account_id, failures, %until, "Account locked");
    }
    Ok(failures)
}

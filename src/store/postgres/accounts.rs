use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::Instrument;
use uuid::Uuid;

use super::{account_from_row, map_err, not_found, query_span, PgStore, ACCOUNT_COLUMNS};
use crate::{
    model::{Account, NewAccount, Role},
    store::{AccountStore, StoreError},
};

/// `UPDATE accounts ... WHERE id = $1` and report whether a row matched.
async fn execute_update(
    store: &PgStore,
    query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    statement: &str,
    context: &'static str,
) -> Result<bool, StoreError> {
    let span = query_span("UPDATE", statement);
    let result = query
        .execute(store.pool())
        .instrument(span)
        .await
        .map_err(map_err(context))?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl AccountStore for PgStore {
    async fn fetch_by_identifier(&self, identifier: &str) -> Result<Option<Account>, StoreError> {
        let query = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE LOWER(username) = LOWER($1) OR LOWER(email) = LOWER($1) LIMIT 1"
        );
        let span = query_span("SELECT", &query);
        let row = sqlx::query(&query)
            .bind(identifier.trim())
            .fetch_optional(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to lookup account by identifier"))?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn fetch_by_id(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let span = query_span("SELECT", &query);
        let row = sqlx::query(&query)
            .bind(account_id)
            .fetch_optional(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to lookup account by id"))?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError> {
        let query = format!(
            "INSERT INTO accounts (username, email, display_name, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ACCOUNT_COLUMNS}"
        );
        let span = query_span("INSERT", &query);
        let row = sqlx::query(&query)
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.display_name)
            .bind(&account.password_hash)
            .bind(account.role.as_str())
            .fetch_one(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to insert account"))?;
        Ok(account_from_row(&row))
    }

    async fn record_failed_attempt(&self, account_id: Uuid) -> Result<i32, StoreError> {
        let query = r"
            UPDATE accounts
            SET failed_attempts = failed_attempts + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING failed_attempts
        ";
        let span = query_span("UPDATE", query);
        let row = sqlx::query(query)
            .bind(account_id)
            .fetch_optional(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to record failed attempt"))?;
        row.map(|row| row.get("failed_attempts"))
            .ok_or_else(|| not_found("account", account_id))
    }

    async fn reset_failed_attempts(&self, account_id: Uuid) -> Result<(), StoreError> {
        let query = "UPDATE accounts SET failed_attempts = 0, lockout_until = NULL, updated_at = NOW() WHERE id = $1";
        execute_update(
            self,
            sqlx::query(query).bind(account_id),
            query,
            "failed to reset failed attempts",
        )
        .await
        .map(|_| ())
    }

    async fn record_successful_login(
        &self,
        account_id: Uuid,
        ip: Option<&str>,
    ) -> Result<(), StoreError> {
        let ip = ip.map(str::to_string);
        let query = "UPDATE accounts SET last_login_at = NOW(), last_login_ip = $2, updated_at = NOW() WHERE id = $1";
        execute_update(
            self,
            sqlx::query(query).bind(account_id).bind(ip),
            query,
            "failed to record successful login",
        )
        .await
        .map(|_| ())
    }

    async fn lock_until(&self, account_id: Uuid, until: DateTime<Utc>) -> Result<(), StoreError> {
        let query = "UPDATE accounts SET lockout_until = $2, updated_at = NOW() WHERE id = $1";
        execute_update(
            self,
            sqlx::query(query).bind(account_id).bind(until),
            query,
            "failed to set lockout",
        )
        .await
        .map(|_| ())
    }

    async fn is_locked(&self, account_id: Uuid) -> Result<bool, StoreError> {
        let query = "SELECT COALESCE(lockout_until > NOW(), FALSE) AS locked FROM accounts WHERE id = $1";
        let span = query_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(account_id)
            .fetch_optional(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to read lockout"))?;
        row.map(|row| row.get("locked"))
            .ok_or_else(|| not_found("account", account_id))
    }

    async fn update_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let password_hash = password_hash.to_string();
        let query = "UPDATE accounts SET password_hash = $2, password_salt = NULL, updated_at = NOW() WHERE id = $1";
        execute_update(
            self,
            sqlx::query(query).bind(account_id).bind(password_hash),
            query,
            "failed to update password hash",
        )
        .await
        .map(|_| ())
    }

    async fn set_role(&self, account_id: Uuid, role: Role) -> Result<bool, StoreError> {
        let query = "UPDATE accounts SET role = $2, updated_at = NOW() WHERE id = $1";
        execute_update(
            self,
            sqlx::query(query).bind(account_id).bind(role.as_str()),
            query,
            "failed to set role",
        )
        .await
    }

    async fn set_active(&self, account_id: Uuid, active: bool) -> Result<bool, StoreError> {
        let query = "UPDATE accounts SET active = $2, updated_at = NOW() WHERE id = $1";
        execute_update(
            self,
            sqlx::query(query).bind(account_id).bind(active),
            query,
            "failed to set active flag",
        )
        .await
    }

    async fn mark_email_verified(&self, account_id: Uuid) -> Result<(), StoreError> {
        let query = "UPDATE accounts SET email_verified = TRUE, updated_at = NOW() WHERE id = $1";
        execute_update(
            self,
            sqlx::query(query).bind(account_id),
            query,
            "failed to mark email verified",
        )
        .await
        .map(|_| ())
    }
}

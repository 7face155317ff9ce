use async_trait::async_trait;
use sqlx::Row;
use tracing::Instrument;
use uuid::Uuid;

use super::{map_err, query_span, PgStore};
use crate::{
    model::{LoginAttempt, SensitiveAccess},
    store::{AuditSink, StoreError},
};

#[async_trait]
impl AuditSink for PgStore {
    async fn append_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO login_attempts
                (identifier, account_id, ip, user_agent, success, reason, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        let span = query_span("INSERT", query);
        sqlx::query(query)
            .bind(&attempt.identifier)
            .bind(attempt.account_id)
            .bind(&attempt.ip)
            .bind(&attempt.user_agent)
            .bind(attempt.success)
            .bind(&attempt.reason)
            .bind(attempt.attempted_at)
            .execute(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to append login attempt"))?;
        Ok(())
    }

    async fn append_access(&self, access: &SensitiveAccess) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO sensitive_access_log
                (action, entity_type, entity_id, actor_id, actor_ip, value_hash, accessed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        let span = query_span("INSERT", query);
        sqlx::query(query)
            .bind(access.action.as_str())
            .bind(&access.entity_type)
            .bind(&access.entity_id)
            .bind(access.actor_id)
            .bind(&access.actor_ip)
            .bind(access.value_hash.as_ref().map(|hash| hash.as_str().to_string()))
            .bind(access.accessed_at)
            .execute(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to append sensitive access"))?;
        Ok(())
    }

    async fn recent_attempts(
        &self,
        account_id: Uuid,
        limit: u32,
    ) -> Result<Vec<LoginAttempt>, StoreError> {
        let query = r"
            SELECT identifier, account_id, ip, user_agent, success, reason, attempted_at
            FROM login_attempts
            WHERE account_id = $1
            ORDER BY attempted_at DESC
            LIMIT $2
        ";
        let span = query_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(account_id)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to read login attempts"))?;

        Ok(rows
            .iter()
            .map(|row| LoginAttempt {
                identifier: row.get("identifier"),
                account_id: row.get("account_id"),
                ip: row.get("ip"),
                user_agent: row.get("user_agent"),
                success: row.get("success"),
                reason: row.get("reason"),
                attempted_at: row.get("attempted_at"),
            })
            .collect())
    }
}

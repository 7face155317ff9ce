use async_trait::async_trait;
use sqlx::Row;
use tracing::Instrument;
use uuid::Uuid;

use super::{map_err, query_span, PgStore};
use crate::{
    model::{NewRecoveryToken, TokenKind},
    store::{RecoveryTokenStore, StoreError},
};

#[async_trait]
impl RecoveryTokenStore for PgStore {
    async fn issue(&self, token: NewRecoveryToken) -> Result<(), StoreError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(map_err("begin token transaction"))?;

        let supersede = r"
            UPDATE recovery_tokens
            SET used_at = NOW()
            WHERE account_id = $1 AND kind = $2 AND used_at IS NULL
        ";
        let span = query_span("UPDATE", supersede);
        sqlx::query(supersede)
            .bind(token.account_id)
            .bind(token.kind.as_str())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(map_err("failed to supersede recovery tokens"))?;

        let insert = r"
            INSERT INTO recovery_tokens (account_id, kind, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = query_span("INSERT", insert);
        sqlx::query(insert)
            .bind(token.account_id)
            .bind(token.kind.as_str())
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(map_err("failed to insert recovery token"))?;

        tx.commit()
            .await
            .map_err(map_err("commit token transaction"))
    }

    async fn consume(
        &self,
        token_hash: &[u8],
        kind: TokenKind,
    ) -> Result<Option<Uuid>, StoreError> {
        let query = r"
            UPDATE recovery_tokens
            SET used_at = NOW()
            WHERE token_hash = $1 AND kind = $2 AND used_at IS NULL AND expires_at > NOW()
            RETURNING account_id
        ";
        let span = query_span("UPDATE", query);
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(kind.as_str())
            .fetch_optional(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to consume recovery token"))?;
        Ok(row.map(|row| row.get("account_id")))
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let query = "DELETE FROM recovery_tokens WHERE used_at IS NOT NULL OR expires_at <= NOW()";
        let span = query_span("DELETE", query);
        let result = sqlx::query(query)
            .execute(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to purge recovery tokens"))?;
        Ok(result.rows_affected())
    }
}

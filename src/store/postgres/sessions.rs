use async_trait::async_trait;
use sqlx::{postgres::PgRow, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{map_err, query_span, PgStore};
use crate::{
    model::{NewSession, Session},
    store::{SessionStore, StoreError},
};

const SESSION_COLUMNS: &str =
    "id, account_id, created_at, expires_at, revoked, revoked_at, ip, user_agent";

fn session_from_row(row: &PgRow) -> Session {
    Session {
        id: row.get("id"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        revoked: row.get("revoked"),
        revoked_at: row.get("revoked_at"),
        ip: row.get("ip"),
        user_agent: row.get("user_agent"),
    }
}

fn insert_statement() -> String {
    format!(
        "INSERT INTO sessions (account_id, token_hash, refresh_hash, ip, user_agent, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {SESSION_COLUMNS}"
    )
}

fn bind_insert<'q>(
    query: &'q str,
    session: &'q NewSession,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(query)
        .bind(session.account_id)
        .bind(&session.token_hash)
        .bind(&session.refresh_hash)
        .bind(&session.ip)
        .bind(&session.user_agent)
        .bind(session.expires_at)
}

impl PgStore {
    async fn fetch_active_by(
        &self,
        column: &'static str,
        hash: &[u8],
    ) -> Result<Option<Session>, StoreError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE {column} = $1 AND NOT revoked AND expires_at > NOW()"
        );
        let span = query_span("SELECT", &query);
        let row = sqlx::query(&query)
            .bind(hash)
            .fetch_optional(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to lookup session"))?;
        Ok(row.as_ref().map(session_from_row))
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create(&self, session: NewSession) -> Result<Session, StoreError> {
        let query = insert_statement();
        let span = query_span("INSERT", &query);
        let row = bind_insert(&query, &session)
            .fetch_one(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to insert session"))?;
        Ok(session_from_row(&row))
    }

    async fn fetch_active_by_token(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<Session>, StoreError> {
        self.fetch_active_by("token_hash", token_hash).await
    }

    async fn fetch_active_by_refresh(
        &self,
        refresh_hash: &[u8],
    ) -> Result<Option<Session>, StoreError> {
        self.fetch_active_by("refresh_hash", refresh_hash).await
    }

    async fn revoke(&self, session_id: Uuid) -> Result<bool, StoreError> {
        let query =
            "UPDATE sessions SET revoked = TRUE, revoked_at = NOW() WHERE id = $1 AND NOT revoked";
        let span = query_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(session_id)
            .execute(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to revoke session"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn rotate(
        &self,
        old_session_id: Uuid,
        replacement: NewSession,
    ) -> Result<Option<Session>, StoreError> {
        // The conditional UPDATE takes the row lock; a concurrent rotation of the
        // same session blocks on it and then matches zero rows.
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(map_err("begin rotate transaction"))?;

        let revoke = r"
            UPDATE sessions
            SET revoked = TRUE, revoked_at = NOW()
            WHERE id = $1 AND NOT revoked AND expires_at > NOW()
        ";
        let span = query_span("UPDATE", revoke);
        let revoked = sqlx::query(revoke)
            .bind(old_session_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(map_err("failed to revoke rotated session"))?;

        if revoked.rows_affected() != 1 {
            let _ = tx.rollback().await;
            return Ok(None);
        }

        let insert = insert_statement();
        let span = query_span("INSERT", &insert);
        let row = bind_insert(&insert, &replacement)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .map_err(map_err("failed to insert rotated session"))?;

        tx.commit()
            .await
            .map_err(map_err("commit rotate transaction"))?;

        Ok(Some(session_from_row(&row)))
    }

    async fn revoke_all_for_account(&self, account_id: Uuid) -> Result<u64, StoreError> {
        let query = "UPDATE sessions SET revoked = TRUE, revoked_at = NOW() WHERE account_id = $1 AND NOT revoked";
        let span = query_span("UPDATE", query);
        let result = sqlx::query(query)
            .bind(account_id)
            .execute(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to revoke account sessions"))?;
        Ok(result.rows_affected())
    }

    async fn list_active_for_account(&self, account_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE account_id = $1 AND NOT revoked AND expires_at > NOW() \
             ORDER BY created_at DESC"
        );
        let span = query_span("SELECT", &query);
        let rows = sqlx::query(&query)
            .bind(account_id)
            .fetch_all(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to list sessions"))?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let query = "UPDATE sessions SET revoked = TRUE, revoked_at = NOW() WHERE NOT revoked AND expires_at <= NOW()";
        let span = query_span("UPDATE", query);
        let result = sqlx::query(query)
            .execute(self.pool())
            .instrument(span)
            .await
            .map_err(map_err("failed to purge expired sessions"))?;
        Ok(result.rows_affected())
    }
}

//! PostgreSQL-backed stores (schema in `db/sql/01_sigma.sql`).
//!
//! Every statement runs inside a `db.query` span. Atomic paths rely on single
//! `UPDATE ... RETURNING` statements or short transactions so concurrent
//! service instances cannot under-count failures or double-spend tokens.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{postgres::PgRow, Connection, PgPool, Row};
use tracing::{info_span, Instrument, Span};

use super::{Ping, StoreError};
use crate::model::{Account, Role};

mod accounts;
mod audit;
mod sessions;
mod tokens;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Ping for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .map_err(map_err("failed to acquire database connection"))?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .map_err(map_err("failed to ping database"))
    }
}

pub(super) fn query_span(operation: &str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

pub(super) fn map_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| {
        if is_unique_violation(&err) {
            let constraint = match &err {
                sqlx::Error::Database(db_err) => db_err.constraint().unwrap_or("unique").to_string(),
                _ => "unique".to_string(),
            };
            return StoreError::Conflict(constraint);
        }
        StoreError::Backend(anyhow::Error::new(err).context(context))
    }
}

pub(super) fn not_found(what: &str, id: uuid::Uuid) -> StoreError {
    StoreError::Backend(anyhow!("{what} {id} not found"))
}

pub(super) const ACCOUNT_COLUMNS: &str = "id, username, email, display_name, password_hash, \
     password_salt, role, active, email_verified, failed_attempts, lockout_until, \
     last_login_at, last_login_ip, created_at";

pub(super) fn account_from_row(row: &PgRow) -> Account {
    let role: String = row.get("role");
    Account {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        password_hash: row.get("password_hash"),
        password_salt: row.get("password_salt"),
        role: role.parse::<Role>().ok(),
        active: row.get("active"),
        email_verified: row.get("email_verified"),
        failed_attempts: row.get("failed_attempts"),
        lockout_until: row.get("lockout_until"),
        last_login_at: row.get("last_login_at"),
        last_login_ip: row.get("last_login_ip"),
        created_at: row.get("created_at"),
    }
}

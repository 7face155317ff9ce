//! # Sigma (identity and sensitive-data protection)
//!
//! `sigma` authenticates operators of a registry system and protects the
//! personal data they handle.
//!
//! ## Authentication
//!
//! Accounts log in with a username or email and a password hashed with
//! PBKDF2-HMAC-SHA256. Repeated failures lock the account for a while. A
//! successful login opens a server-side session identified by an opaque token;
//! only SHA-256 digests of session and refresh tokens are stored. Every attempt
//! lands in the audit trail, and callers always see the same generic denial.
//!
//! ## Authorization
//!
//! Roles map onto a strict numeric ladder (`VIEWER` < `OPERATOR` < `ANALYST` <
//! `MANAGER` < `ADMIN`). The guard re-reads the account on every check, so a
//! role change or deactivation takes effect on the next request.
//!
//! ## Sensitive fields
//!
//! National ids and phone numbers are validated, normalized to digits, then
//! sealed with an AEAD key derived from a master secret. An unkeyed SHA-256
//! search hash sits beside each ciphertext so records can be found without
//! decrypting anything. Single-record disclosure requires the manager level and
//! is always audited.
//!
//! ## Storage
//!
//! Services talk to narrow adapter traits in [`store`]. `PostgreSQL` backs
//! production (`db/sql/01_sigma.sql`); an in-memory store backs tests.

pub mod accounts;
pub mod api;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod guard;
pub mod model;
pub mod recovery;
pub mod sensitive;
pub mod store;
pub mod sweeper;
pub mod validators;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use anyhow::{ensure, Context, Result};
    use std::{fs, path::PathBuf};

    // Whitespace and case are irrelevant to these checks.
    fn canonical_schema() -> Result<String> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_sigma.sql");
        let sql = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read SQL file at {}", path.display()))?;
        Ok(sql
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_lowercase())
            .collect())
    }

    #[test]
    fn schema_defines_every_table() -> Result<()> {
        let canonical = canonical_schema()?;
        for table in [
            "accounts",
            "sessions",
            "login_attempts",
            "sensitive_access_log",
            "recovery_tokens",
        ] {
            ensure!(
                canonical.contains(&format!("createtableifnotexists{table}(")),
                "missing table {table}"
            );
        }
        Ok(())
    }

    #[test]
    fn schema_stores_only_token_digests() -> Result<()> {
        let canonical = canonical_schema()?;
        ensure!(canonical.contains("token_hashbyteanotnullunique"));
        ensure!(canonical.contains("refresh_hashbyteanotnullunique"));
        ensure!(!canonical.contains("session_tokentext"));
        Ok(())
    }

    #[test]
    fn identifiers_are_unique_case_insensitively() -> Result<()> {
        let canonical = canonical_schema()?;
        ensure!(canonical.contains("onaccounts(lower(username))"));
        ensure!(canonical.contains("onaccounts(lower(email))"));
        Ok(())
    }

    #[test]
    fn commit_hash_is_set() {
        assert!(!super::GIT_COMMIT_HASH.is_empty());
    }
}

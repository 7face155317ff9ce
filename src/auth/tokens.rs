//! Opaque bearer tokens.
//!
//! Raw values only leave the process once, in the response that creates them;
//! storage sees the SHA-256 digest.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

/// 256 random bits, URL-safe base64 without padding.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// A session token and its refresh token, as handed to the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub session_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub(crate) fn generate() -> Result<Self> {
        Ok(Self {
            session_token: generate_token()?,
            refresh_token: generate_token()?,
        })
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("session_token", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

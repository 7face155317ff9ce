//! Envelope encryption for sensitive fields (national ids, phones).
//!
//! Flow Overview:
//! 1) Derive a 256-bit key once from the operator-supplied master secret
//!    (PBKDF2-HMAC-SHA256, fixed application salt, 100000 rounds).
//! 2) `encrypt` seals with ChaCha20-Poly1305 under a fresh random nonce and
//!    returns URL-safe text: `b64(version || nonce || ciphertext+tag)`.
//! 3) `hash` is an unsalted SHA-256 hex digest used only for equality search.
//!
//! The cipher instance is built at startup and shared read-only; there is no
//! global. Decryption is for single, audited records (see `sensitive`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

pub const KEY_DERIVATION_SALT: &[u8] = b"sigma-pli-2025";
pub const KEY_DERIVATION_ITERATIONS: u32 = 100_000;
const RECOMMENDED_SECRET_LEN: usize = 32;
const ENVELOPE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("master secret is missing or empty")]
    MissingMasterSecret,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("could not decrypt sensitive value")]
pub struct DecryptionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("could not encrypt sensitive value")]
pub struct EncryptionError;

/// Hex SHA-256 of a normalized sensitive value.
///
/// Only built by hashing or by re-reading a stored 64-char hex digest, so a
/// plaintext value cannot be passed where a hash is expected.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SearchHash(String);

impl SearchHash {
    #[must_use]
    pub fn of(plaintext: &str) -> Self {
        Self(format!("{:x}", Sha256::digest(plaintext.as_bytes())))
    }

    /// Accept a stored digest. Anything but 64 lowercase hex chars is rejected.
    #[must_use]
    pub fn from_hex(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SearchHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SearchHash({})", &self.0[..8.min(self.0.len())])
    }
}

impl std::fmt::Display for SearchHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ciphertext and search hash of one value, always produced together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedValue {
    ciphertext: String,
    search_hash: SearchHash,
}

impl SealedValue {
    /// Rebuild from the two persisted columns.
    #[must_use]
    pub fn from_stored(ciphertext: String, search_hash: SearchHash) -> Self {
        Self {
            ciphertext,
            search_hash,
        }
    }

    #[must_use]
    pub fn ciphertext(&self) -> &str {
        &self.ciphertext
    }

    #[must_use]
    pub fn search_hash(&self) -> &SearchHash {
        &self.search_hash
    }
}

#[derive(Clone)]
pub struct EnvelopeCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("key", &"***")
            .finish()
    }
}

impl EnvelopeCipher {
    /// Derive the data key from the master secret.
    ///
    /// # Errors
    /// Returns `ConfigurationError::MissingMasterSecret` for an empty or blank secret.
    pub fn from_master_secret(master_secret: &SecretString) -> Result<Self, ConfigurationError> {
        let secret = master_secret.expose_secret();
        if secret.trim().is_empty() {
            return Err(ConfigurationError::MissingMasterSecret);
        }
        if secret.len() < RECOMMENDED_SECRET_LEN {
            warn!(
                "master secret is shorter than {} bytes; use a longer random value",
                RECOMMENDED_SECRET_LEN
            );
        }

        let mut key = Zeroizing::new([0u8; 32]);
        pbkdf2_hmac::<Sha256>(
            secret.as_bytes(),
            KEY_DERIVATION_SALT,
            KEY_DERIVATION_ITERATIONS,
            key.as_mut_slice(),
        );
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
            .map_err(|e| ConfigurationError::Invalid(format!("derived key rejected: {e}")))?;

        Ok(Self { cipher })
    }

    /// Encrypt under a fresh nonce; equal inputs never produce equal outputs.
    ///
    /// # Errors
    /// Returns `EncryptionError` if the AEAD refuses the input.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EncryptionError)?;

        let mut envelope = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(envelope))
    }

    /// # Errors
    /// Returns `DecryptionError` on bad encoding, unknown version, tampering or a different key.
    pub fn decrypt(&self, token: &str) -> Result<String, DecryptionError> {
        let envelope = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| DecryptionError)?;
        if envelope.len() < 1 + NONCE_LEN + TAG_LEN || envelope[0] != ENVELOPE_VERSION {
            return Err(DecryptionError);
        }

        let (nonce_bytes, ciphertext) = envelope[1..].split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| DecryptionError)?;

        String::from_utf8(plaintext).map_err(|_| DecryptionError)
    }

    #[must_use]
    pub fn hash(&self, plaintext: &str) -> SearchHash {
        SearchHash::of(plaintext)
    }

    /// # Errors
    /// Returns `EncryptionError` if encryption fails.
    pub fn encrypt_and_hash(&self, plaintext: &str) -> Result<SealedValue, EncryptionError> {
        Ok(SealedValue {
            ciphertext: self.encrypt(plaintext)?,
            search_hash: self.hash(plaintext),
        })
    }

    /// Compare against a stored digest without decrypting anything.
    #[must_use]
    pub fn verify_hash(&self, plaintext: &str, expected: &str) -> bool {
        let computed = SearchHash::of(plaintext);
        computed
            .as_str()
            .as_bytes()
            .ct_eq(expected.trim().to_ascii_lowercase().as_bytes())
            .into()
    }
}

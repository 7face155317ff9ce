//! Password hashing with PBKDF2-HMAC-SHA256.
//!
//! Stored format: `pbkdf2-sha256$<iterations>$<salt b64>$<hash b64>`.
//! Older rows carry a hex digest plus a separate hex salt (100000 rounds, salt
//! used as its UTF-8 text); they still verify but report `needs_rehash` so the
//! login path can replace them. bcrypt rows are recognised and always fail.

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub const MIN_ITERATIONS: u32 = 100_000;
pub const DEFAULT_ITERATIONS: u32 = 210_000;
const LEGACY_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const SCHEME: &str = "pbkdf2-sha256";
// Salt "sigma-decoy-salt" and an all-zero digest no password derives to.
const DECOY_SALT: &str = "c2lnbWEtZGVjb3ktc2FsdA";
const DECOY_HASH: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// A stored credential as read back from the account row.
#[derive(Clone, PartialEq, Eq)]
pub enum HashRecord {
    Current(String),
    Legacy { hash_hex: String, salt: String },
    Unsupported,
}

impl HashRecord {
    /// Classify what the account row holds.
    #[must_use]
    pub fn from_stored(hash: &str, salt: Option<&str>) -> Self {
        if hash.starts_with(SCHEME) {
            return Self::Current(hash.to_string());
        }
        if hash.starts_with("$2a$") || hash.starts_with("$2b$") || hash.starts_with("$2y$") {
            return Self::Unsupported;
        }
        match salt {
            Some(salt) if !salt.is_empty() => Self::Legacy {
                hash_hex: hash.to_string(),
                salt: salt.to_string(),
            },
            _ => Self::Unsupported,
        }
    }

    /// Value for the `password_hash` column. Current records never need a salt column.
    #[must_use]
    pub fn encoded(&self) -> Option<&str> {
        match self {
            Self::Current(encoded) => Some(encoded),
            _ => None,
        }
    }
}

impl std::fmt::Debug for HashRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current(_) => f.write_str("HashRecord::Current(***)"),
            Self::Legacy { .. } => f.write_str("HashRecord::Legacy(***)"),
            Self::Unsupported => f.write_str("HashRecord::Unsupported"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CredentialHasher {
    iterations: u32,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl CredentialHasher {
    /// Iteration counts below `MIN_ITERATIONS` are raised to it.
    #[must_use]
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(MIN_ITERATIONS),
        }
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    #[must_use]
    pub fn hash(&self, password: &str) -> HashRecord {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut out = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, self.iterations, &mut out);
        HashRecord::Current(format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(out)
        ))
    }

    /// Constant-time verification. Malformed records return `false`.
    #[must_use]
    pub fn verify(&self, password: &str, record: &HashRecord) -> bool {
        match record {
            HashRecord::Current(encoded) => verify_current(password, encoded),
            HashRecord::Legacy { hash_hex, salt } => verify_legacy(password, hash_hex, salt),
            HashRecord::Unsupported => false,
        }
    }

    /// `hash` on the blocking pool, off the request scheduler.
    ///
    /// # Errors
    /// Only if the blocking task panics or is cancelled.
    pub async fn hash_blocking(self, password: &str) -> anyhow::Result<HashRecord> {
        let password = Zeroizing::new(password.to_string());
        tokio::task::spawn_blocking(move || self.hash(&password))
            .await
            .context("password hashing task failed")
    }

    /// `verify` on the blocking pool.
    ///
    /// # Errors
    /// Only if the blocking task panics or is cancelled.
    pub async fn verify_blocking(self, password: &str, record: HashRecord) -> anyhow::Result<bool> {
        let password = Zeroizing::new(password.to_string());
        tokio::task::spawn_blocking(move || self.verify(&password, &record))
            .await
            .context("password verification task failed")
    }

    /// A well-formed record at this hasher's cost that never verifies.
    ///
    /// Login checks it when there is no usable account, so a missing user
    /// costs the same PBKDF2 work as a wrong password.
    #[must_use]
    pub fn decoy(&self) -> HashRecord {
        HashRecord::Current(format!(
            "{SCHEME}${}${DECOY_SALT}${DECOY_HASH}",
            self.iterations
        ))
    }

    /// True when the record should be replaced after a successful verification.
    #[must_use]
    pub fn needs_rehash(&self, record: &HashRecord) -> bool {
        match record {
            HashRecord::Current(encoded) => {
                parse_current(encoded).map_or(true, |parsed| parsed.iterations < self.iterations)
            }
            HashRecord::Legacy { .. } | HashRecord::Unsupported => true,
        }
    }
}

struct ParsedHash {
    iterations: u32,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

fn parse_current(encoded: &str) -> Option<ParsedHash> {
    let mut parts = encoded.split('$');
    if parts.next()? != SCHEME {
        return None;
    }
    let iterations: u32 = parts.next()?.parse().ok()?;
    let salt = STANDARD_NO_PAD.decode(parts.next()?).ok()?;
    let hash = STANDARD_NO_PAD.decode(parts.next()?).ok()?;
    if parts.next().is_some() || iterations == 0 || salt.is_empty() || hash.is_empty() {
        return None;
    }
    Some(ParsedHash {
        iterations,
        salt,
        hash,
    })
}

fn verify_current(password: &str, encoded: &str) -> bool {
    let Some(parsed) = parse_current(encoded) else {
        return false;
    };
    let mut out = vec![0u8; parsed.hash.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &parsed.salt, parsed.iterations, &mut out);
    out.ct_eq(&parsed.hash).into()
}

fn verify_legacy(password: &str, hash_hex: &str, salt: &str) -> bool {
    let Some(expected) = decode_hex(hash_hex) else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }
    let mut out = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), LEGACY_ITERATIONS, &mut out);
    out.ct_eq(&expected).into()
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 || !value.is_ascii() {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&value[i..i + 2], 16).ok())
        .collect()
}

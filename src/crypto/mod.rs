//! Password hashing and sensitive-field envelope encryption.

pub mod envelope;
pub mod password;

pub use envelope::{
    ConfigurationError, DecryptionError, EncryptionError, EnvelopeCipher, SealedValue, SearchHash,
};
pub use password::{CredentialHasher, HashRecord};

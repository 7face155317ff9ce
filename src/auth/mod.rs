//! Authentication: credential checks, lockout and the session lifecycle.

pub mod config;
mod lockout;
pub mod service;
pub mod tokens;

pub use config::AuthConfig;
pub(crate) use lockout::record_failure;
pub use service::{AuthService, ResolvedSession, SessionGrant};
pub use tokens::{generate_token, hash_token, TokenPair};

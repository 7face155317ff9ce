//! Typed records exchanged across the store adapter boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::crypto::{HashRecord, SearchHash};

/// Numeric access level, 1 (lowest) to 5 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessLevel(u8);

impl AccessLevel {
    pub const VIEWER: Self = Self(1);
    pub const OPERATOR: Self = Self(2);
    pub const ANALYST: Self = Self(3);
    pub const MANAGER: Self = Self(4);
    pub const ADMIN: Self = Self(5);

    #[must_use]
    pub fn new(level: u8) -> Option<Self> {
        (1..=5).contains(&level).then_some(Self(level))
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role tags, ordered by the access level they grant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Analyst,
    Manager,
    Admin,
}

impl Role {
    pub const ALL: [Self; 5] = [
        Self::Viewer,
        Self::Operator,
        Self::Analyst,
        Self::Manager,
        Self::Admin,
    ];

    #[must_use]
    pub fn level(self) -> AccessLevel {
        match self {
            Self::Viewer => AccessLevel::VIEWER,
            Self::Operator => AccessLevel::OPERATOR,
            Self::Analyst => AccessLevel::ANALYST,
            Self::Manager => AccessLevel::MANAGER,
            Self::Admin => AccessLevel::ADMIN,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Operator => "operator",
            Self::Analyst => "analyst",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown role: {value}"))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub password_salt: Option<String>,
    /// `None` when the stored tag is not a known role.
    pub role: Option<Role>,
    pub active: bool,
    pub email_verified: bool,
    pub failed_attempts: i32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    #[must_use]
    pub fn access_level(&self) -> Option<AccessLevel> {
        self.role.map(Role::level)
    }

    #[must_use]
    pub fn credential(&self) -> HashRecord {
        HashRecord::from_stored(&self.password_hash, self.password_salt.as_deref())
    }

    /// Active lockout at `now`; an expired lockout does not count.
    #[must_use]
    pub fn locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| until > now)
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            account_id: self.id,
            username: self.username.clone(),
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| self.username.clone()),
            email: self.email.clone(),
            last_login_at: self.last_login_at,
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"***")
            .field("role", &self.role)
            .field("active", &self.active)
            .field("failed_attempts", &self.failed_attempts)
            .field("lockout_until", &self.lockout_until)
            .finish_non_exhaustive()
    }
}

/// Fields needed to insert an account.
#[derive(Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub role: Role,
}

/// Public view of an authenticated account. Never carries credentials or sensitive fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub account_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: Uuid,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// Session to insert. Tokens arrive already hashed; raw values never reach storage.
#[derive(Clone)]
pub struct NewSession {
    pub account_id: Uuid,
    pub token_hash: Vec<u8>,
    pub refresh_hash: Vec<u8>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Why a login or refresh was refused. Only the audit trail sees this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialReason {
    UnknownIdentifier,
    Inactive,
    Locked,
    BadPassword,
    Timeout,
    InvalidToken,
}

impl DenialReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownIdentifier => "unknown_identifier",
            Self::Inactive => "inactive",
            Self::Locked => "locked",
            Self::BadPassword => "bad_password",
            Self::Timeout => "timeout",
            Self::InvalidToken => "invalid_token",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LoginAttempt {
    pub identifier: String,
    pub account_id: Option<Uuid>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub reason: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Decrypt,
    SearchNationalId,
    SearchPhone,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Decrypt => "DECRYPT",
            Self::SearchNationalId => "SEARCH_NATIONAL_ID",
            Self::SearchPhone => "SEARCH_PHONE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveAccess {
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub actor_ip: Option<String>,
    pub value_hash: Option<SearchHash>,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    PasswordReset,
    EmailVerification,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::EmailVerification => "email_verification",
        }
    }
}

#[derive(Clone)]
pub struct NewRecoveryToken {
    pub account_id: Uuid,
    pub kind: TokenKind,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

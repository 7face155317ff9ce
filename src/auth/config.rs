//! Authentication policy knobs.

use chrono::Duration;

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
pub const DEFAULT_MAX_FAILED_ATTEMPTS: i32 = 5;
pub const DEFAULT_LOCKOUT_MINUTES: i64 = 15;
pub const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PASSWORD_RESET_TTL_HOURS: i64 = 2;
pub const DEFAULT_EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    session_ttl_hours: i64,
    max_failed_attempts: i32,
    lockout_minutes: i64,
    storage_timeout_ms: u64,
    password_reset_ttl_hours: i64,
    email_verification_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lockout_minutes: DEFAULT_LOCKOUT_MINUTES,
            storage_timeout_ms: DEFAULT_STORAGE_TIMEOUT_MS,
            password_reset_ttl_hours: DEFAULT_PASSWORD_RESET_TTL_HOURS,
            email_verification_ttl_hours: DEFAULT_EMAIL_VERIFICATION_TTL_HOURS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_hours(mut self, hours: i64) -> Self {
        self.session_ttl_hours = hours.max(1);
        self
    }

    #[must_use]
    pub fn with_max_failed_attempts(mut self, attempts: i32) -> Self {
        self.max_failed_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_minutes(mut self, minutes: i64) -> Self {
        self.lockout_minutes = minutes.max(1);
        self
    }

    #[must_use]
    pub fn with_storage_timeout_ms(mut self, millis: u64) -> Self {
        self.storage_timeout_ms = millis.max(1);
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl_hours(mut self, hours: i64) -> Self {
        self.password_reset_ttl_hours = hours.max(1);
        self
    }

    #[must_use]
    pub fn with_email_verification_ttl_hours(mut self, hours: i64) -> Self {
        self.email_verification_ttl_hours = hours.max(1);
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::hours(self.session_ttl_hours)
    }

    #[must_use]
    pub fn max_failed_attempts(&self) -> i32 {
        self.max_failed_attempts
    }

    #[must_use]
    pub fn lockout(&self) -> Duration {
        Duration::minutes(self.lockout_minutes)
    }

    #[must_use]
    pub fn storage_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.storage_timeout_ms)
    }

    #[must_use]
    pub fn password_reset_ttl(&self) -> Duration {
        Duration::hours(self.password_reset_ttl_hours)
    }

    #[must_use]
    pub fn email_verification_ttl(&self) -> Duration {
        Duration::hours(self.email_verification_ttl_hours)
    }
}

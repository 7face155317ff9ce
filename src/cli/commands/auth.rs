//! Authentication policy knobs.

use clap::{Arg, Command};

use crate::crypto::password::MIN_ITERATIONS;

pub const ARG_SESSION_TTL_HOURS: &str = "session-ttl-hours";
pub const ARG_MAX_FAILED_ATTEMPTS: &str = "max-failed-attempts";
pub const ARG_LOCKOUT_MINUTES: &str = "lockout-minutes";
pub const ARG_STORAGE_TIMEOUT_MS: &str = "storage-timeout-ms";
pub const ARG_PASSWORD_ITERATIONS: &str = "password-iterations";
pub const ARG_PASSWORD_RESET_TTL_HOURS: &str = "password-reset-ttl-hours";
pub const ARG_EMAIL_VERIFICATION_TTL_HOURS: &str = "email-verification-ttl-hours";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";
pub const ARG_INSECURE_COOKIES: &str = "insecure-cookies";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL_HOURS)
                .long(ARG_SESSION_TTL_HOURS)
                .help("Session lifetime in hours")
                .env("SIGMA_SESSION_TTL_HOURS")
                .default_value("24")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MAX_FAILED_ATTEMPTS)
                .long(ARG_MAX_FAILED_ATTEMPTS)
                .help("Consecutive failed logins before the account is locked")
                .env("SIGMA_MAX_FAILED_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(i32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_MINUTES)
                .long(ARG_LOCKOUT_MINUTES)
                .help("Lockout duration in minutes")
                .env("SIGMA_LOCKOUT_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_STORAGE_TIMEOUT_MS)
                .long(ARG_STORAGE_TIMEOUT_MS)
                .help("Upper bound for a single storage call, in milliseconds")
                .env("SIGMA_STORAGE_TIMEOUT_MS")
                .default_value("5000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_ITERATIONS)
                .long(ARG_PASSWORD_ITERATIONS)
                .help("PBKDF2 iterations for new password hashes")
                .env("SIGMA_PASSWORD_ITERATIONS")
                .default_value("210000")
                .value_parser(clap::value_parser!(u32).range(i64::from(MIN_ITERATIONS)..)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_RESET_TTL_HOURS)
                .long(ARG_PASSWORD_RESET_TTL_HOURS)
                .help("Password reset token lifetime in hours")
                .env("SIGMA_PASSWORD_RESET_TTL_HOURS")
                .default_value("2")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_EMAIL_VERIFICATION_TTL_HOURS)
                .long(ARG_EMAIL_VERIFICATION_TTL_HOURS)
                .help("Email verification token lifetime in hours")
                .env("SIGMA_EMAIL_VERIFICATION_TTL_HOURS")
                .default_value("24")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Seconds between purges of expired sessions and tokens")
                .env("SIGMA_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_INSECURE_COOKIES)
                .long(ARG_INSECURE_COOKIES)
                .help("Drop the Secure flag from the session cookie (plain HTTP development only)")
                .env("SIGMA_INSECURE_COOKIES")
                .action(clap::ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::config::{
            DEFAULT_EMAIL_VERIFICATION_TTL_HOURS, DEFAULT_LOCKOUT_MINUTES,
            DEFAULT_MAX_FAILED_ATTEMPTS, DEFAULT_PASSWORD_RESET_TTL_HOURS,
            DEFAULT_SESSION_TTL_HOURS, DEFAULT_STORAGE_TIMEOUT_MS,
        },
        crypto::password::DEFAULT_ITERATIONS,
        sweeper::DEFAULT_SWEEP_INTERVAL_SECONDS,
    };

    #[test]
    fn defaults_match_library_constants() {
        let matches = with_args(Command::new("sigma")).get_matches_from(vec!["sigma"]);
        assert_eq!(
            matches.get_one::<i64>(ARG_SESSION_TTL_HOURS).copied(),
            Some(DEFAULT_SESSION_TTL_HOURS)
        );
        assert_eq!(
            matches.get_one::<i32>(ARG_MAX_FAILED_ATTEMPTS).copied(),
            Some(DEFAULT_MAX_FAILED_ATTEMPTS)
        );
        assert_eq!(
            matches.get_one::<i64>(ARG_LOCKOUT_MINUTES).copied(),
            Some(DEFAULT_LOCKOUT_MINUTES)
        );
        assert_eq!(
            matches.get_one::<u64>(ARG_STORAGE_TIMEOUT_MS).copied(),
            Some(DEFAULT_STORAGE_TIMEOUT_MS)
        );
        assert_eq!(
            matches.get_one::<u32>(ARG_PASSWORD_ITERATIONS).copied(),
            Some(DEFAULT_ITERATIONS)
        );
        assert_eq!(
            matches.get_one::<i64>(ARG_PASSWORD_RESET_TTL_HOURS).copied(),
            Some(DEFAULT_PASSWORD_RESET_TTL_HOURS)
        );
        assert_eq!(
            matches.get_one::<i64>(ARG_EMAIL_VERIFICATION_TTL_HOURS).copied(),
            Some(DEFAULT_EMAIL_VERIFICATION_TTL_HOURS)
        );
        assert_eq!(
            matches.get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS).copied(),
            Some(DEFAULT_SWEEP_INTERVAL_SECONDS)
        );
        assert!(!matches.get_flag(ARG_INSECURE_COOKIES));
    }

    #[test]
    fn weak_iteration_counts_are_rejected() {
        let result = with_args(Command::new("sigma")).try_get_matches_from(vec![
            "sigma",
            "--password-iterations",
            "1000",
        ]);
        assert!(result.is_err());
    }
}

use crate::{
    auth::AuthConfig,
    cli::{
        actions::{server::Args, Action},
        commands::{self, auth},
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::time::Duration;

fn required<T: Clone + Send + Sync + 'static>(matches: &clap::ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(commands::ARG_PORT).copied().unwrap_or(8080);
    let dsn: String = required(matches, commands::ARG_DSN)?;
    let master_secret = SecretString::from(required::<String>(matches, commands::ARG_MASTER_SECRET)?);

    let config = AuthConfig::new()
        .with_session_ttl_hours(required(matches, auth::ARG_SESSION_TTL_HOURS)?)
        .with_max_failed_attempts(required(matches, auth::ARG_MAX_FAILED_ATTEMPTS)?)
        .with_lockout_minutes(required(matches, auth::ARG_LOCKOUT_MINUTES)?)
        .with_storage_timeout_ms(required(matches, auth::ARG_STORAGE_TIMEOUT_MS)?)
        .with_password_reset_ttl_hours(required(matches, auth::ARG_PASSWORD_RESET_TTL_HOURS)?)
        .with_email_verification_ttl_hours(required(
            matches,
            auth::ARG_EMAIL_VERIFICATION_TTL_HOURS,
        )?);

    Ok(Action::Server(Args {
        port,
        dsn,
        master_secret,
        config,
        password_iterations: required(matches, auth::ARG_PASSWORD_ITERATIONS)?,
        sweep_interval: Duration::from_secs(required(matches, auth::ARG_SWEEP_INTERVAL_SECONDS)?),
        secure_cookies: !matches.get_flag(auth::ARG_INSECURE_COOKIES),
        trust_proxy_headers: matches.get_flag(commands::ARG_TRUST_PROXY_HEADERS),
    }))
}

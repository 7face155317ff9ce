use crate::{
    api::{self, AppState},
    auth::AuthConfig,
    cli::telemetry,
    clock::{Clock, SystemClock},
    crypto::{CredentialHasher, EnvelopeCipher},
    recovery::LogTokenSender,
    store::postgres::PgStore,
    sweeper::Sweeper,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use url::Url;

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub master_secret: SecretString,
    pub config: AuthConfig,
    pub password_iterations: u32,
    pub sweep_interval: Duration,
    pub secure_cookies: bool,
    pub trust_proxy_headers: bool,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("dsn", &redact_dsn(&self.dsn))
            .field("master_secret", &"***")
            .field("config", &self.config)
            .field("password_iterations", &self.password_iterations)
            .field("sweep_interval", &self.sweep_interval)
            .field("secure_cookies", &self.secure_cookies)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .finish()
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the master secret is unusable, the database is
/// unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let result = run(args).await;
    telemetry::shutdown_tracer();
    result
}

async fn run(args: Args) -> Result<()> {
    // Refuse to start without a usable field key.
    let cipher = EnvelopeCipher::from_master_secret(&args.master_secret)
        .context("Failed to derive the field encryption key")?;

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(args.config.storage_timeout())
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(PgStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let sweeper = Sweeper::new(store.clone(), store.clone(), args.sweep_interval).spawn();

    let state = Arc::new(AppState::from_store(
        store,
        clock,
        Arc::new(cipher),
        args.config,
        CredentialHasher::new(args.password_iterations),
        Arc::new(LogTokenSender),
        args.secure_cookies,
    )
    .with_trusted_proxy_headers(args.trust_proxy_headers));

    let served = api::serve(args.port, state, shutdown_signal()).await;
    sweeper.abort();
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Gracefully shutdown");
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        (
            "session_ttl_hours",
            args.config.session_ttl().num_hours().to_string(),
        ),
        (
            "max_failed_attempts",
            args.config.max_failed_attempts().to_string(),
        ),
        (
            "lockout_minutes",
            args.config.lockout().num_minutes().to_string(),
        ),
        (
            "storage_timeout_ms",
            args.config.storage_timeout().as_millis().to_string(),
        ),
        ("password_iterations", args.password_iterations.to_string()),
        (
            "sweep_interval_seconds",
            args.sweep_interval.as_secs().to_string(),
        ),
        ("secure_cookies", args.secure_cookies.to_string()),
        ("trust_proxy_headers", args.trust_proxy_headers.to_string()),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "sigma {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

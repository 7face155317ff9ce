//! HTTP transport over the services.
//!
//! Handlers stay thin: parse the request, call one service operation, map the
//! result. Everything they need travels in [`AppState`] through an
//! `Extension` layer.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    response::Json,
    routing::{get, post, put},
    Extension, Router,
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

use crate::{
    accounts::AccountService,
    audit::AuditLogger,
    auth::{AuthConfig, AuthService},
    clock::Clock,
    crypto::{CredentialHasher, EnvelopeCipher},
    guard::PermissionGuard,
    recovery::{RecoveryService, TokenSender},
    sensitive::SensitiveFields,
    store::{AccountStore, AuditSink, Ping, RecoveryTokenStore, SessionStore},
};

pub mod error;
pub mod handlers;
pub mod openapi;
pub mod principal;
pub mod types;

use handlers::{admin, auth, health, recovery};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub accounts: AccountService,
    pub recovery: RecoveryService,
    pub sensitive: SensitiveFields,
    pub sender: Arc<dyn TokenSender>,
    pub store: Arc<dyn Ping>,
    /// Adds `Secure` to the session cookie; off only for plain-HTTP development.
    pub secure_cookies: bool,
    /// Read the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy_headers: bool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("secure_cookies", &self.secure_cookies)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire every service over one backend that implements all store traits.
    pub fn from_store<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        cipher: Arc<EnvelopeCipher>,
        config: AuthConfig,
        hasher: CredentialHasher,
        sender: Arc<dyn TokenSender>,
        secure_cookies: bool,
    ) -> Self
    where
        S: AccountStore + SessionStore + AuditSink + RecoveryTokenStore + Ping + 'static,
    {
        let timeout = config.storage_timeout();
        let guard = PermissionGuard::new(store.clone(), timeout);
        let audit = AuditLogger::new(store.clone(), clock.clone(), timeout);
        let sensitive = SensitiveFields::new(cipher, guard.clone(), audit.clone());
        let auth = AuthService::new(
            store.clone(),
            store.clone(),
            audit,
            hasher,
            clock.clone(),
            config.clone(),
        );
        let accounts = AccountService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            guard,
            hasher,
            clock.clone(),
            config.clone(),
        );
        let recovery = RecoveryService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            accounts.clone(),
            clock,
            config,
        );
        Self {
            auth,
            accounts,
            recovery,
            sensitive,
            sender,
            store,
            secure_cookies,
            trust_proxy_headers: false,
        }
    }

    /// Only enable behind a proxy that overwrites the forwarding headers.
    #[must_use]
    pub fn with_trusted_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }
}

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_origin(Any);

    Router::new()
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/logout", post(auth::logout))
        .route("/v1/auth/refresh", post(auth::refresh))
        .route("/v1/auth/session", get(auth::session))
        .route("/v1/auth/sessions", get(auth::sessions))
        .route("/v1/auth/password/change", post(auth::change_password))
        .route("/v1/auth/password/forgot", post(recovery::forgot))
        .route("/v1/auth/password/reset", post(recovery::reset))
        .route("/v1/auth/email/verify", post(recovery::verify_email))
        .route("/v1/auth/email/resend", post(auth::resend_verification))
        .route("/v1/admin/accounts/:id/role", put(admin::set_role))
        .route("/v1/admin/accounts/:id/deactivate", post(admin::deactivate))
        .route("/v1/admin/accounts/:id/reactivate", post(admin::reactivate))
        .route("/v1/admin/accounts/:id/unlock", post(admin::unlock))
        .route("/v1/admin/accounts/:id/attempts", get(admin::attempts))
        .route("/openapi.json", get(|| async { Json(openapi::openapi()) }))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors),
        )
        // health stays outside the trace layer to keep probes out of the logs
        .route("/health", get(health::health).options(health::health))
        .layer(Extension(state))
}

/// Serve until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let method = request.method().as_str();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    // Headers are not recorded: they carry bearer tokens and session cookies.
    debug_span!("http-request", method, path, request_id)
}
